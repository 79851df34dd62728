//! Bulk catch-up of a derived table over a fixed id range.
//!
//! The range is walked in windows `[cursor, cursor + batch)`. The cursor is
//! persisted after every successful window, so a restarted run resumes at
//! the first window that never completed. A failing window stops the walk
//! and leaves the persisted cursor where it was.

use std::time::{Duration, Instant};

use tracing::{error, info, instrument};

use crate::{config::CatchUpConfig, CursorStore, IncrementalProcedures, JobError, Timer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchUpPlan {
    pub procedure: String,
    pub first_id: u64,
    pub last_id: u64,
    pub batch_size: u64,
    pub delay: Duration,
}

impl CatchUpPlan {
    pub fn from_config(config: &CatchUpConfig, last_id: u64) -> Result<Self, JobError> {
        if config.batch_size == 0 {
            return Err(JobError::Config("catch-up batch size must be positive".into()));
        }

        Ok(Self {
            procedure: config.procedure.clone(),
            first_id: config.first_id,
            last_id,
            batch_size: config.batch_size,
            delay: config.delay(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchUpOutcome {
    /// Windows processed by this run
    pub windows: u64,

    /// Cursor persisted after the last successful window
    pub cursor: u64,

    /// Whether the whole range has been covered
    pub finished: bool,
}

pub struct CatchUp<P, C, T> {
    procs: P,
    cursor: C,
    timer: T,
    plan: CatchUpPlan,
}

impl<P, C, T> CatchUp<P, C, T>
where
    P: IncrementalProcedures,
    C: CursorStore + Sync,
    T: Timer,
{
    pub fn new(procs: P, cursor: C, timer: T, plan: CatchUpPlan) -> Self {
        Self {
            procs,
            cursor,
            timer,
            plan,
        }
    }

    pub fn plan(&self) -> &CatchUpPlan {
        &self.plan
    }

    /// Where the next window starts, resuming from the persisted cursor
    pub fn resume_point(&self) -> Result<u64, JobError> {
        let cursor = self.cursor.load()?;
        Ok(cursor.unwrap_or(self.plan.first_id))
    }

    fn outcome(&self, windows: u64, cursor: u64) -> CatchUpOutcome {
        CatchUpOutcome {
            windows,
            cursor,
            finished: cursor > self.plan.last_id,
        }
    }

    #[instrument(skip_all, fields(procedure = %self.plan.procedure))]
    pub async fn run(&self) -> Result<CatchUpOutcome, JobError> {
        let mut cursor = self.resume_point()?;
        let mut windows = 0;

        info!(
            cursor,
            last_id = self.plan.last_id,
            batch_size = self.plan.batch_size,
            "catch-up started"
        );

        while cursor <= self.plan.last_id {
            if self.timer.is_cancelled() {
                info!(cursor, windows, "catch-up interrupted");
                return Ok(self.outcome(windows, cursor));
            }

            let start = cursor;
            let end = start.saturating_add(self.plan.batch_size);
            let started = Instant::now();

            if let Err(err) = self
                .procs
                .process_window(&self.plan.procedure, start, end)
                .await
            {
                error!(
                    start,
                    end,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    %err,
                    "window failed"
                );

                return Err(JobError::step(&self.plan.procedure, err));
            }

            self.cursor.store(end)?;
            cursor = end;
            windows += 1;

            let remaining = match self.plan.last_id.checked_sub(cursor) {
                Some(left) => left.saturating_add(1).div_ceil(self.plan.batch_size),
                None => 0,
            };

            info!(
                start,
                end,
                elapsed_ms = started.elapsed().as_millis() as u64,
                remaining,
                "window processed"
            );

            if cursor <= self.plan.last_id {
                match self.timer.sleep(self.plan.delay).await {
                    Ok(()) => (),
                    Err(JobError::Cancelled) => {
                        info!(cursor, windows, "catch-up interrupted");
                        return Ok(self.outcome(windows, cursor));
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        info!(cursor, windows, "catch-up finished");

        Ok(self.outcome(windows, cursor))
    }
}
