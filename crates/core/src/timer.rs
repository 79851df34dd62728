//! Clock and sleep abstraction for the long-running jobs.
//!
//! Every wait a job performs (epoch countdown, snapshot polling, delay
//! between windows) goes through a [`Timer`]. The production timer races the
//! sleep against a cancellation token so a shutdown request interrupts the
//! wait instead of killing the process mid-step. Tests swap in a manual clock
//! that advances instantly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::JobError;

/// Seconds since the unix epoch
pub type Timestamp = u64;

#[trait_variant::make(Send)]
pub trait Timer: Sync {
    fn now(&self) -> Timestamp;

    /// Sleep for `duration` or fail with [`JobError::Cancelled`] if the job
    /// is asked to stop first.
    async fn sleep(&self, duration: Duration) -> Result<(), JobError>;

    fn is_cancelled(&self) -> bool;
}

#[derive(Clone, Default)]
pub struct SystemTimer {
    cancel: CancellationToken,
}

impl SystemTimer {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Timer for SystemTimer {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|x| x.as_secs())
            .unwrap_or_default()
    }

    async fn sleep(&self, duration: Duration) -> Result<(), JobError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => {
                debug!("wait interrupted by cancellation");
                Err(JobError::Cancelled)
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
