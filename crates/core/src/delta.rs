//! Steady-state delta aggregation.
//!
//! On every cycle each configured target is advanced by at most one batch:
//! the procedure folds ledger rows `(watermark, watermark + batch]` into its
//! derived table and the watermark is moved forward only once the procedure
//! returned. Procedures are expected to be idempotent, so a cycle that dies
//! between the procedure and the watermark write is simply redone.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument};

use crate::{
    config::{DeltaConfig, DeltaTarget, TipSource},
    IncrementalProcedures, JobError, LedgerReader, StoreError, Timer, WatermarkStore,
};

/// Remaining work of a target, for observability only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Backlog {
    pub outstanding: u64,
    pub batches_left: u64,
    pub time_left: Duration,
}

impl Backlog {
    pub fn estimate(tip: u64, watermark: u64, batch_size: u64, last_batch: Duration) -> Self {
        let outstanding = tip.saturating_sub(watermark);

        let batches_left = match batch_size {
            0 => 0,
            size => outstanding.div_ceil(size),
        };

        let time_left = last_batch.saturating_mul(u32::try_from(batches_left).unwrap_or(u32::MAX));

        Self {
            outstanding,
            batches_left,
            time_left,
        }
    }

    pub fn is_caught_up(&self) -> bool {
        self.outstanding == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProgress {
    pub table: String,
    pub previous: u64,
    pub watermark: u64,
    pub tip: u64,
    pub elapsed: Duration,
    pub backlog: Backlog,
}

impl TargetProgress {
    pub fn advanced(&self) -> bool {
        self.watermark > self.previous
    }
}

pub(crate) fn ensure_monotonic(table: &str, current: u64, proposed: u64) -> Result<(), JobError> {
    if proposed < current {
        return Err(JobError::WatermarkRegression {
            table: table.to_string(),
            current,
            proposed,
        });
    }

    Ok(())
}

pub struct DeltaAggregator<L, P, W, T> {
    ledger: L,
    procs: P,
    watermarks: W,
    timer: T,
    targets: Vec<DeltaTarget>,
    batch_size: u64,
    interval: Duration,
}

impl<L, P, W, T> DeltaAggregator<L, P, W, T>
where
    L: LedgerReader,
    P: IncrementalProcedures,
    W: WatermarkStore,
    T: Timer,
{
    pub fn new(
        ledger: L,
        procs: P,
        watermarks: W,
        timer: T,
        config: &DeltaConfig,
    ) -> Result<Self, JobError> {
        if config.batch_size == 0 {
            return Err(JobError::Config("delta batch size must be positive".into()));
        }

        if config.targets.is_empty() {
            return Err(JobError::Config("no delta targets configured".into()));
        }

        Ok(Self {
            ledger,
            procs,
            watermarks,
            timer,
            targets: config.targets.clone(),
            batch_size: config.batch_size,
            interval: config.interval(),
        })
    }

    pub fn targets(&self) -> &[DeltaTarget] {
        &self.targets
    }

    async fn tip_for(&self, source: TipSource) -> Result<u64, StoreError> {
        match source {
            TipSource::Tx => self.ledger.max_transaction_id().await,
            TipSource::Asset => self.ledger.max_asset_id().await,
        }
    }

    #[instrument(skip_all, fields(table = %target.table))]
    pub async fn advance_target(&self, target: &DeltaTarget) -> Result<TargetProgress, JobError> {
        let started = Instant::now();

        let previous = self.watermarks.get_watermark(&target.table).await?;
        let tip = self.tip_for(target.source).await?;

        if tip <= previous {
            debug!(watermark = previous, tip, "target is up to date");

            return Ok(TargetProgress {
                table: target.table.clone(),
                previous,
                watermark: previous,
                tip,
                elapsed: started.elapsed(),
                backlog: Backlog::default(),
            });
        }

        let up_to = tip.min(previous.saturating_add(self.batch_size));
        ensure_monotonic(&target.table, previous, up_to)?;

        self.procs
            .advance(&target.procedure, previous, up_to)
            .await
            .map_err(|err| JobError::step(&target.procedure, err))?;

        self.watermarks.set_watermark(&target.table, up_to).await?;

        let elapsed = started.elapsed();
        let backlog = Backlog::estimate(tip, up_to, self.batch_size, elapsed);

        info!(
            from = previous,
            to = up_to,
            tip,
            elapsed_ms = elapsed.as_millis() as u64,
            outstanding = backlog.outstanding,
            batches_left = backlog.batches_left,
            eta_secs = backlog.time_left.as_secs(),
            "target advanced"
        );

        Ok(TargetProgress {
            table: target.table.clone(),
            previous,
            watermark: up_to,
            tip,
            elapsed,
            backlog,
        })
    }

    /// Advance every target once, in configuration order. The first failure
    /// aborts the cycle.
    pub async fn run_cycle(&self) -> Result<Vec<TargetProgress>, JobError> {
        let mut out = Vec::with_capacity(self.targets.len());

        for target in self.targets.iter() {
            let progress = self.advance_target(target).await?;
            out.push(progress);
        }

        Ok(out)
    }

    /// Watermark and backlog of every target without doing any work
    pub async fn status(&self) -> Result<Vec<TargetProgress>, JobError> {
        let mut out = Vec::with_capacity(self.targets.len());

        for target in self.targets.iter() {
            let watermark = self.watermarks.get_watermark(&target.table).await?;
            let tip = self.tip_for(target.source).await?;

            out.push(TargetProgress {
                table: target.table.clone(),
                previous: watermark,
                watermark,
                tip,
                elapsed: Duration::ZERO,
                backlog: Backlog::estimate(tip, watermark, self.batch_size, Duration::ZERO),
            });
        }

        Ok(out)
    }

    /// Run cycles on a fixed interval until cancelled. Any failure ends the
    /// loop with an error.
    pub async fn run(&self) -> Result<(), JobError> {
        let mut cycle = 0u64;

        loop {
            if self.timer.is_cancelled() {
                break;
            }

            let started_at = self.timer.now();
            let started = Instant::now();

            info!(cycle, started_at, "delta cycle started");

            match self.run_cycle().await {
                Ok(progress) => {
                    let pending = progress.iter().filter(|x| !x.backlog.is_caught_up()).count();

                    info!(
                        cycle,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        pending,
                        "delta cycle completed"
                    );
                }
                Err(err) => {
                    error!(
                        cycle,
                        started_at,
                        failed_at = self.timer.now(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        %err,
                        "delta cycle failed"
                    );

                    return Err(err);
                }
            }

            cycle += 1;

            match self.timer.sleep(self.interval).await {
                Ok(()) => (),
                Err(JobError::Cancelled) => break,
                Err(err) => return Err(err),
            }
        }

        info!(cycles = cycle, "delta loop stopped");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn backlog_rounds_batches_up() {
        let backlog = Backlog::estimate(1_050, 1_000, 20, Duration::from_secs(3));

        assert_eq!(backlog.outstanding, 50);
        assert_eq!(backlog.batches_left, 3);
        assert_eq!(backlog.time_left, Duration::from_secs(9));
    }

    #[test]
    fn backlog_of_caught_up_target_is_empty() {
        let backlog = Backlog::estimate(1_000, 1_000, 20, Duration::from_secs(3));
        assert!(backlog.is_caught_up());
        assert_eq!(backlog.batches_left, 0);
        assert_eq!(backlog.time_left, Duration::ZERO);

        let behind = Backlog::estimate(900, 1_000, 20, Duration::from_secs(3));
        assert!(behind.is_caught_up());
    }

    #[test]
    fn regressing_watermark_is_rejected() {
        assert!(ensure_monotonic("_cbi_x", 10, 10).is_ok());
        assert!(ensure_monotonic("_cbi_x", 10, 11).is_ok());

        assert!(matches!(
            ensure_monotonic("_cbi_x", 10, 9),
            Err(JobError::WatermarkRegression {
                current: 10,
                proposed: 9,
                ..
            })
        ));
    }

    proptest! {
        #[test]
        fn batches_cover_outstanding(tip in 0u64..10_000_000, watermark in 0u64..10_000_000, batch in 1u64..100_000) {
            let backlog = Backlog::estimate(tip, watermark, batch, Duration::ZERO);

            prop_assert!(backlog.batches_left * batch >= backlog.outstanding);
            prop_assert!(backlog.batches_left.saturating_sub(1) * batch < backlog.outstanding.max(1));
        }
    }
}
