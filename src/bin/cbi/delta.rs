use miette::{Context as _, IntoDiagnostic};
use tracing::info;

use cbi_core::{config::RootConfig, DeltaAggregator};

use crate::common;

pub const JOB: &str = "delta";

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
pub async fn run(config: &RootConfig, args: &Args) -> miette::Result<()> {
    common::setup_tracing(&config.logging)?;

    let Some(lock) = common::acquire_lock(config, JOB)? else {
        return Ok(());
    };

    let db = common::open_db(config).await?;
    let timer = common::system_timer();

    let aggregator = DeltaAggregator::new(db.clone(), db.clone(), db, timer, &config.delta)
        .into_diagnostic()?;

    let result = if args.once {
        aggregator.run_cycle().await.map(|progress| {
            for x in progress {
                info!(
                    table = x.table,
                    watermark = x.watermark,
                    tip = x.tip,
                    outstanding = x.backlog.outstanding,
                    "target status"
                );
            }
        })
    } else {
        aggregator.run().await
    };

    lock.release_after(result)
        .into_diagnostic()
        .context("running delta aggregator")
}
