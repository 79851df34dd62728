use miette::{Context as _, IntoDiagnostic};
use tracing::info;

use cbi_cardano::{EpochBoundary, EpochTiming};
use cbi_core::config::RootConfig;

use crate::common;

pub const JOB: &str = "epoch-boundary";

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Run the pipeline for the current epoch right away instead of waiting
    /// for the next one
    #[arg(long)]
    run_on_start: bool,
}

#[tokio::main]
pub async fn run(config: &RootConfig, args: &Args) -> miette::Result<()> {
    common::setup_tracing(&config.logging)?;

    let timing = EpochTiming::from_config(&config.network).into_diagnostic()?;

    let Some(lock) = common::acquire_lock(config, JOB)? else {
        return Ok(());
    };

    let db = common::open_db(config).await?;
    let timer = common::system_timer();

    let mut boundary_config = config.boundary.clone();
    boundary_config.run_on_start |= args.run_on_start;

    info!(
        network = %config.network.name,
        genesis_start = timing.genesis_start,
        epoch_length = timing.epoch_length,
        "starting epoch boundary orchestrator"
    );

    let boundary = EpochBoundary::new(db.clone(), db, timer, timing, boundary_config);

    let result = boundary.run().await;

    lock.release_after(result)
        .into_diagnostic()
        .context("running epoch boundary")
}
