use comfy_table::Table;
use miette::{Context as _, IntoDiagnostic};

use cbi_cardano::{PollError, PollSummary, PollTallyEngine};
use cbi_core::config::RootConfig;

use crate::common;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// List the polls published on chain
    List,

    /// Tally the votes of a poll
    Tally(TallyArgs),
}

#[derive(Debug, clap::Args)]
pub struct TallyArgs {
    /// Poll hash, with or without the 0x prefix
    hash: String,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

fn percent(x: f64) -> String {
    format!("{:.2}%", x * 100.0)
}

fn print_summary(summary: &PollSummary) {
    let poll = &summary.poll;

    println!("{}", poll.question);
    println!(
        "published in epoch {}, closes at epoch {}, weighed at epoch {}",
        poll.epoch_no, poll.end_epoch, summary.snapshot_epoch
    );

    let tally = &summary.tally;

    let mut table = Table::new();
    table.set_header(vec![
        "choice", "votes", "votes %", "delegators", "delegators %", "stake", "stake %",
    ]);

    for (i, answer) in poll.choices.iter().enumerate() {
        table.add_row(vec![
            answer.clone(),
            tally.votes[i].to_string(),
            percent(tally.vote_pct[i]),
            tally.delegators[i].to_string(),
            percent(tally.delegator_pct[i]),
            tally.stake[i].to_string(),
            percent(tally.stake_pct[i]),
        ]);
    }

    table.add_row(vec![
        "total".to_string(),
        tally.total_votes.to_string(),
        String::new(),
        tally.total_delegators.to_string(),
        String::new(),
        tally.total_stake.to_string(),
        String::new(),
    ]);

    println!("{table}");

    let mut votes = Table::new();
    votes.set_header(vec!["pool", "ticker", "answer", "source", "epoch", "tx"]);

    for vote in summary.votes.iter() {
        votes.add_row(vec![
            vote.pool_id.clone(),
            vote.ticker.clone().unwrap_or_default(),
            vote.answer.clone(),
            format!("{:?}", vote.source),
            vote.epoch_no.to_string(),
            vote.tx_hash.clone(),
        ]);
    }

    println!("{votes}");

    if summary.superseded > 0 {
        println!("{} later votes ignored, first vote per pool wins", summary.superseded);
    }

    if !summary.skipped.is_empty() {
        let mut skipped = Table::new();
        skipped.set_header(vec!["pool", "tx", "reason"]);

        for vote in summary.skipped.iter() {
            skipped.add_row(vec![
                vote.pool_id.clone(),
                vote.tx_hash.clone(),
                vote.reason.clone(),
            ]);
        }

        println!("skipped malformed votes:");
        println!("{skipped}");
    }
}

#[tokio::main]
pub async fn run(config: &RootConfig, command: &Command) -> miette::Result<()> {
    common::setup_tracing(&config.logging)?;

    let db = common::open_db(config).await?;
    let engine = PollTallyEngine::new(db, config.polls.clone());

    match command {
        Command::List => {
            let polls = engine.list().await.into_diagnostic()?;

            let mut table = Table::new();
            table.set_header(vec!["hash", "epoch", "ends", "choices", "question"]);

            for poll in polls {
                table.add_row(vec![
                    poll.hash,
                    poll.epoch_no.to_string(),
                    poll.end_epoch.to_string(),
                    poll.choices.len().to_string(),
                    poll.question,
                ]);
            }

            println!("{table}");
        }
        Command::Tally(args) => {
            let summary = match engine.tally(&args.hash).await {
                Ok(x) => x,
                Err(PollError::NotFound(hash)) => miette::bail!("poll {hash} not found"),
                Err(err) => return Err(err).into_diagnostic().context("tallying poll"),
            };

            if args.json {
                let json = serde_json::to_string_pretty(&summary).into_diagnostic()?;
                println!("{json}");
            } else {
                print_summary(&summary);
            }
        }
    }

    Ok(())
}
