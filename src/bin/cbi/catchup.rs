use miette::{Context as _, IntoDiagnostic};
use tracing::info;

use cbi_core::{config::RootConfig, CatchUp, CatchUpPlan, FileCursor, LedgerReader as _};

use crate::common;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// First id of the range, only used when no cursor was persisted yet
    #[arg(long)]
    first_id: Option<u64>,

    /// Last id of the range, defaults to the current asset tip
    #[arg(long)]
    last_id: Option<u64>,
}

#[tokio::main]
pub async fn run(config: &RootConfig, args: &Args) -> miette::Result<()> {
    common::setup_tracing(&config.logging)?;

    let mut catchup_config = config.catchup.clone();

    if let Some(first_id) = args.first_id {
        catchup_config.first_id = first_id;
    }

    if let Some(last_id) = args.last_id {
        catchup_config.last_id = Some(last_id);
    }

    let Some(lock) = common::acquire_lock(config, &catchup_config.job)? else {
        return Ok(());
    };

    let db = common::open_db(config).await?;

    let last_id = match catchup_config.last_id {
        Some(x) => x,
        None => db
            .max_asset_id()
            .await
            .into_diagnostic()
            .context("reading asset tip")?,
    };

    let plan = CatchUpPlan::from_config(&catchup_config, last_id).into_diagnostic()?;

    std::fs::create_dir_all(&config.storage.state_dir)
        .into_diagnostic()
        .context("creating state directory")?;

    let cursor = FileCursor::new(config.storage.state_dir.join(&catchup_config.cursor_file));

    let job = CatchUp::new(db, cursor, common::system_timer(), plan);

    let result = job.run().await;

    let outcome = lock
        .release_after(result)
        .into_diagnostic()
        .context("running catch-up")?;

    info!(
        windows = outcome.windows,
        cursor = outcome.cursor,
        finished = outcome.finished,
        "catch-up done"
    );

    Ok(())
}
