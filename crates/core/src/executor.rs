//! Ordered step executor.
//!
//! Runs a fixed list of steps strictly in sequence, measuring each one. The
//! first failing step stops the run; steps after it are never started.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, instrument};

use crate::StoreError;

/// A named unit of work executed against a context `C`
#[trait_variant::make(Send)]
pub trait JobStep<C: Sync>: Sync {
    fn name(&self) -> String;

    async fn execute(&self, ctx: &C) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRun {
    pub name: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub runs: Vec<StepRun>,
}

impl RunReport {
    pub fn total(&self) -> Duration {
        self.runs.iter().map(|x| x.elapsed).sum()
    }

    pub fn names(&self) -> Vec<&str> {
        self.runs.iter().map(|x| x.name.as_str()).collect()
    }
}

#[derive(Debug, Error)]
#[error("step {step} failed after {elapsed:?}")]
pub struct StepFailure {
    pub step: String,
    pub elapsed: Duration,

    /// Steps that completed before the failure
    pub completed: RunReport,

    #[source]
    pub error: StoreError,
}

/// Execute `steps` in order, stopping at the first failure.
#[instrument(skip_all, fields(job = %job))]
pub async fn execute_steps<C, S>(job: &str, ctx: &C, steps: &[S]) -> Result<RunReport, StepFailure>
where
    C: Sync,
    S: JobStep<C>,
{
    info!(steps = steps.len(), "executing steps");

    let mut report = RunReport::default();

    for step in steps {
        let name = step.name();
        let started = Instant::now();

        info!(step = %name, "step started");

        if let Err(err) = step.execute(ctx).await {
            let elapsed = started.elapsed();

            error!(
                step = %name,
                elapsed_ms = elapsed.as_millis() as u64,
                completed = ?report.names(),
                completed_ms = report.total().as_millis() as u64,
                %err,
                "step failed"
            );

            return Err(StepFailure {
                step: name,
                elapsed,
                completed: report,
                error: err,
            });
        }

        let elapsed = started.elapsed();
        info!(step = %name, elapsed_ms = elapsed.as_millis() as u64, "step completed");

        report.runs.push(StepRun { name, elapsed });
    }

    info!(total_ms = report.total().as_millis() as u64, "all steps completed");

    Ok(report)
}
