use std::{fs::OpenOptions, sync::Mutex};

use miette::{Context as _, IntoDiagnostic};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::Targets, prelude::*};

use cbi_core::{
    config::{LoggingConfig, RootConfig},
    LockCoordinator, LockGuard, SystemTimer,
};
use cbi_postgres::DbSync;

pub fn setup_tracing(config: &LoggingConfig) -> miette::Result<()> {
    let level = config.max_level;

    let mut filter = Targets::new()
        .with_target("cbi", level)
        .with_target("cbi_core", level)
        .with_target("cbi_cardano", level)
        .with_target("cbi_postgres", level);

    if config.include_postgres {
        filter = filter
            .with_target("tokio_postgres", level)
            .with_target("bb8", level);
    }

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .into_diagnostic()
                    .context("creating log directory")?;
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()
                .context("opening log file")?;

            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));

            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

pub fn hook_exit_token() -> CancellationToken {
    let cancel = CancellationToken::new();

    let cancel2 = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "can't listen for exit signal");
            return;
        }

        warn!("exit signal detected");
        debug!("notifying exit");
        cancel2.cancel();
    });

    cancel
}

pub fn system_timer() -> SystemTimer {
    SystemTimer::new(hook_exit_token())
}

pub async fn open_db(config: &RootConfig) -> miette::Result<DbSync> {
    DbSync::connect(&config.database)
        .await
        .into_diagnostic()
        .context("connecting to db-sync")
}

/// Take the job lock, or return `None` when another instance holds it
pub fn acquire_lock(config: &RootConfig, job: &str) -> miette::Result<Option<LockGuard>> {
    let coordinator = LockCoordinator::new(&config.storage.lock_dir);

    let guard = coordinator
        .guard(job)
        .into_diagnostic()
        .context("acquiring job lock")?;

    if guard.is_none() {
        match coordinator.holder(job) {
            Ok(Some(holder)) => info!(
                job,
                pid = holder.pid,
                since = %holder.acquired_at,
                "job already running, nothing to do"
            ),
            _ => info!(job, "job already running, nothing to do"),
        }
    }

    Ok(guard)
}
