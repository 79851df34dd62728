use comfy_table::Table;
use miette::{Context as _, IntoDiagnostic};

use cbi_cardano::EpochTiming;
use cbi_core::{
    config::RootConfig, CursorStore as _, DeltaAggregator, FileCursor, LedgerReader as _,
    LockCoordinator, Timer as _,
};

use crate::{common, delta, epoch_boundary};

#[derive(Debug, clap::Args)]
pub struct Args {}

#[tokio::main]
pub async fn run(config: &RootConfig, _args: &Args) -> miette::Result<()> {
    common::setup_tracing(&config.logging)?;

    let timing = EpochTiming::from_config(&config.network).into_diagnostic()?;
    let timer = common::system_timer();

    let position = timing.position(timer.now());

    let db = common::open_db(config).await?;

    let synced_epoch = db
        .max_epoch_no()
        .await
        .into_diagnostic()
        .context("reading ledger epoch")?;

    let snapshot_rows = db
        .epoch_stake_row_count(synced_epoch)
        .await
        .into_diagnostic()
        .context("reading stake snapshot")?;

    println!(
        "network {}: wall-clock epoch {}, next epoch in {}s",
        config.network.name,
        position.epoch,
        position.remaining(timer.now()).as_secs()
    );

    println!("ledger epoch {synced_epoch}, stake snapshot rows {snapshot_rows}");

    let aggregator = DeltaAggregator::new(db.clone(), db.clone(), db, timer, &config.delta)
        .into_diagnostic()?;

    let progress = aggregator
        .status()
        .await
        .into_diagnostic()
        .context("reading watermarks")?;

    let mut table = Table::new();
    table.set_header(vec!["table", "watermark", "tip", "outstanding", "batches left"]);

    for x in progress {
        table.add_row(vec![
            x.table,
            x.watermark.to_string(),
            x.tip.to_string(),
            x.backlog.outstanding.to_string(),
            x.backlog.batches_left.to_string(),
        ]);
    }

    println!("{table}");

    let cursor = FileCursor::new(config.storage.state_dir.join(&config.catchup.cursor_file));

    match cursor.load().into_diagnostic()? {
        Some(x) => println!("{} cursor at {x}", config.catchup.job),
        None => println!("{} not started", config.catchup.job),
    }

    let locks = LockCoordinator::new(&config.storage.lock_dir);

    let mut table = Table::new();
    table.set_header(vec!["job", "locked", "pid", "since"]);

    for job in [epoch_boundary::JOB, delta::JOB, config.catchup.job.as_str()] {
        let holder = locks.holder(job).into_diagnostic()?;

        table.add_row(vec![
            job.to_string(),
            holder.is_some().to_string(),
            holder.as_ref().map(|x| x.pid.to_string()).unwrap_or_default(),
            holder
                .as_ref()
                .map(|x| x.acquired_at.to_rfc3339())
                .unwrap_or_default(),
        ]);
    }

    println!("{table}");

    Ok(())
}
