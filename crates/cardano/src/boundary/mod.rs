//! Epoch boundary orchestration.
//!
//! The orchestrator follows the wall-clock epoch schedule and, once per
//! epoch, rebuilds the aggregate tables that depend on the new stake
//! snapshot. Ledger ingestion lags behind wall-clock time and the snapshot is
//! written over several hours without any notification, so every transition
//! goes through a poll-and-confirm sequence before the pipeline runs:
//!
//! ```text
//! WaitingSameEpoch ──(epoch changed)──> EpochChanged ──(settle)──> AwaitingNewEpochRow
//!        ^                                                                │
//!        │                                                                v
//!  RunningPipeline <── AwaitingStakeSnapshotStability <── AwaitingStakeSnapshotGrowth
//! ```
//!
//! A failed pipeline is not retried: the next transition starts from fresh
//! epoch math and the failed epoch is skipped.

use std::time::Duration;

use tracing::{error, info, warn};

use cbi_core::{
    config::BoundaryConfig, execute_steps, Epoch, JobError, LedgerReader, RunReport, StepFailure,
    Timer, Timestamp,
};

use crate::{AggregateProcedures, EpochTiming};

mod pipeline;

pub use pipeline::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryState {
    /// Nothing to do until the wall-clock epoch moves past `baseline`
    WaitingSameEpoch { baseline: Epoch },

    /// Wall-clock epoch just changed, give the ledger sync a head start
    EpochChanged { epoch: Epoch },

    /// Waiting for the ledger to record its first block of `epoch`
    AwaitingNewEpochRow { epoch: Epoch },

    /// Waiting for the stake snapshot of `epoch` to outgrow the previous one
    AwaitingStakeSnapshotGrowth { epoch: Epoch },

    /// Waiting for the stake snapshot of `epoch` to stop moving
    AwaitingStakeSnapshotStability { epoch: Epoch, rows: u64 },

    RunningPipeline { epoch: Epoch },
}

impl BoundaryState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::WaitingSameEpoch { .. } => "waiting-same-epoch",
            Self::EpochChanged { .. } => "epoch-changed",
            Self::AwaitingNewEpochRow { .. } => "awaiting-new-epoch-row",
            Self::AwaitingStakeSnapshotGrowth { .. } => "awaiting-stake-snapshot-growth",
            Self::AwaitingStakeSnapshotStability { .. } => "awaiting-stake-snapshot-stability",
            Self::RunningPipeline { .. } => "running-pipeline",
        }
    }
}

/// Raises a single warning once a wait runs longer than expected
struct StuckAlarm {
    state: &'static str,
    epoch: Epoch,
    since: Timestamp,
    threshold: Duration,
    raised: bool,
}

impl StuckAlarm {
    fn new(state: &'static str, epoch: Epoch, since: Timestamp, threshold: Duration) -> Self {
        Self {
            state,
            epoch,
            since,
            threshold,
            raised: false,
        }
    }

    fn check(&mut self, now: Timestamp) {
        let waited = now.saturating_sub(self.since);

        if !self.raised && waited >= self.threshold.as_secs() {
            warn!(
                state = self.state,
                epoch = self.epoch,
                waited_secs = waited,
                "epoch boundary looks stuck"
            );

            self.raised = true;
        }
    }
}

pub struct EpochBoundary<L, P, T> {
    ledger: L,
    procs: P,
    timer: T,
    timing: EpochTiming,
    config: BoundaryConfig,
    pipeline: Vec<PipelineStep>,
}

impl<L, P, T> EpochBoundary<L, P, T>
where
    L: LedgerReader,
    P: AggregateProcedures,
    T: Timer,
{
    pub fn new(ledger: L, procs: P, timer: T, timing: EpochTiming, config: BoundaryConfig) -> Self {
        Self {
            ledger,
            procs,
            timer,
            timing,
            config,
            pipeline: REFERENCE_PIPELINE.to_vec(),
        }
    }

    pub fn with_pipeline(self, pipeline: Vec<PipelineStep>) -> Self {
        Self { pipeline, ..self }
    }

    pub fn timing(&self) -> &EpochTiming {
        &self.timing
    }

    pub fn initial_state(&self) -> BoundaryState {
        let position = self.timing.position(self.timer.now());

        if self.config.run_on_start {
            BoundaryState::EpochChanged {
                epoch: position.epoch,
            }
        } else {
            BoundaryState::WaitingSameEpoch {
                baseline: position.epoch,
            }
        }
    }

    fn alarm(&self, state: &'static str, epoch: Epoch) -> StuckAlarm {
        StuckAlarm::new(state, epoch, self.timer.now(), self.config.stuck_alarm())
    }

    async fn wait_same_epoch(&self, baseline: Epoch) -> Result<BoundaryState, JobError> {
        let now = self.timer.now();
        let position = self.timing.position(now);

        if position.epoch == baseline {
            let remaining = position.remaining(now);

            info!(
                epoch = baseline,
                next_epoch_start = position.next_epoch_start,
                remaining_secs = remaining.as_secs(),
                "waiting for next epoch"
            );

            self.timer.sleep(remaining).await?;

            return Ok(BoundaryState::WaitingSameEpoch { baseline });
        }

        info!(previous = baseline, epoch = position.epoch, "epoch changed");

        Ok(BoundaryState::EpochChanged {
            epoch: position.epoch,
        })
    }

    async fn await_new_epoch_row(&self, epoch: Epoch) -> Result<(), JobError> {
        let mut alarm = self.alarm("awaiting-new-epoch-row", epoch);

        loop {
            let synced = self.ledger.max_epoch_no().await?;

            if synced >= epoch {
                info!(epoch, synced, "ledger reached new epoch");
                return Ok(());
            }

            info!(epoch, synced, "ledger hasn't reached new epoch yet");

            alarm.check(self.timer.now());
            self.timer.sleep(self.config.poll_interval()).await?;
        }
    }

    /// Wait until the new snapshot is larger than the previous epoch's, or
    /// until its size stops changing. Returns the last observed row count.
    async fn await_snapshot_growth(&self, epoch: Epoch) -> Result<u64, JobError> {
        let baseline = match epoch.checked_sub(1) {
            Some(previous) => self.ledger.epoch_stake_row_count(previous).await?,
            None => 0,
        };

        info!(epoch, baseline, "waiting for stake snapshot growth");

        let mut alarm = self.alarm("awaiting-stake-snapshot-growth", epoch);
        let mut last = None;
        let mut unchanged = 0;

        loop {
            let rows = self.ledger.epoch_stake_row_count(epoch).await?;

            if rows > baseline {
                info!(epoch, rows, baseline, "stake snapshot outgrew previous epoch");
                return Ok(rows);
            }

            if last == Some(rows) {
                unchanged += 1;
            } else {
                unchanged = 0;
                last = Some(rows);
            }

            if unchanged >= self.config.growth_stable_polls {
                info!(epoch, rows, baseline, unchanged, "stake snapshot stopped moving");
                return Ok(rows);
            }

            alarm.check(self.timer.now());
            self.timer.sleep(self.config.poll_interval()).await?;
        }
    }

    /// Wait until the snapshot row count stays the same for the configured
    /// number of consecutive polls. Returns the stable row count.
    async fn await_snapshot_stability(&self, epoch: Epoch, rows: u64) -> Result<u64, JobError> {
        let mut alarm = self.alarm("awaiting-stake-snapshot-stability", epoch);
        let mut last = rows;
        let mut unchanged = 0;

        while unchanged < self.config.stability_confirm_polls {
            alarm.check(self.timer.now());
            self.timer.sleep(self.config.poll_interval()).await?;

            let rows = self.ledger.epoch_stake_row_count(epoch).await?;

            if rows == last {
                unchanged += 1;
            } else {
                info!(epoch, previous = last, rows, "stake snapshot still moving");
                unchanged = 0;
                last = rows;
            }
        }

        info!(epoch, rows = last, "stake snapshot is stable");

        Ok(last)
    }

    /// Run every pipeline step for `epoch`, in order.
    pub async fn run_pipeline(&self, epoch: Epoch) -> Result<RunReport, StepFailure> {
        let ctx = PipelineContext {
            procs: &self.procs,
            epoch,
            asset_addresses_batch_size: self.config.asset_addresses_batch_size,
        };

        execute_steps("epoch-boundary", &ctx, &self.pipeline).await
    }

    /// Perform one transition of the state machine, including the waits it
    /// implies.
    pub async fn advance(&self, state: BoundaryState) -> Result<BoundaryState, JobError> {
        match state {
            BoundaryState::WaitingSameEpoch { baseline } => self.wait_same_epoch(baseline).await,
            BoundaryState::EpochChanged { epoch } => {
                self.timer.sleep(self.config.settle_delay()).await?;
                Ok(BoundaryState::AwaitingNewEpochRow { epoch })
            }
            BoundaryState::AwaitingNewEpochRow { epoch } => {
                self.await_new_epoch_row(epoch).await?;
                Ok(BoundaryState::AwaitingStakeSnapshotGrowth { epoch })
            }
            BoundaryState::AwaitingStakeSnapshotGrowth { epoch } => {
                let rows = self.await_snapshot_growth(epoch).await?;
                Ok(BoundaryState::AwaitingStakeSnapshotStability { epoch, rows })
            }
            BoundaryState::AwaitingStakeSnapshotStability { epoch, rows } => {
                self.await_snapshot_stability(epoch, rows).await?;
                Ok(BoundaryState::RunningPipeline { epoch })
            }
            BoundaryState::RunningPipeline { epoch } => {
                match self.run_pipeline(epoch).await {
                    Ok(report) => {
                        info!(
                            epoch,
                            total_ms = report.total().as_millis() as u64,
                            "epoch boundary pipeline completed"
                        );
                    }
                    Err(failure) if failure.error.is_connection() => {
                        return Err(JobError::step(failure.step, failure.error));
                    }
                    Err(failure) => {
                        error!(
                            epoch,
                            step = %failure.step,
                            completed = ?failure.completed.names(),
                            "epoch boundary pipeline aborted, epoch will be skipped"
                        );
                    }
                }

                Ok(BoundaryState::WaitingSameEpoch { baseline: epoch })
            }
        }
    }

    /// Drive the state machine until cancelled or until a fatal error.
    pub async fn run(&self) -> Result<(), JobError> {
        let mut state = self.initial_state();

        info!(state = state.label(), "epoch boundary orchestrator started");

        while !self.timer.is_cancelled() {
            state = match self.advance(state).await {
                Ok(next) => next,
                Err(JobError::Cancelled) => break,
                Err(err) => {
                    error!(state = state.label(), %err, "epoch boundary orchestrator failed");
                    return Err(err);
                }
            };
        }

        info!(state = state.label(), "epoch boundary orchestrator stopped");

        Ok(())
    }
}
