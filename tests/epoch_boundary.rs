use std::time::Duration;

use proptest::prelude::*;

use cbi_cardano::{BoundaryState, EpochBoundary, PipelineStep};
use cbi_core::Timer as _;
use cbi_testing::{ManualTimer, RecordingProcedures, ScriptedLedger, TestFault};

mod common;

use common::{boundary_config, POLL, SETTLE, TIMING};

const PIPELINE_CALLS: [&str; 7] = [
    "rebuild_active_stake_cache",
    "rebuild_stake_distribution_cache",
    "rebuild_pool_stats_cache",
    "rebuild_asset_cache",
    "rebuild_asset_addresses_cache",
    "upsert_missing_pool_params",
    "insert_pool_stats_for_epoch",
];

fn boundary(
    ledger: &ScriptedLedger,
    procs: &RecordingProcedures,
    timer: &ManualTimer,
) -> EpochBoundary<ScriptedLedger, RecordingProcedures, ManualTimer> {
    EpochBoundary::new(
        ledger.clone(),
        procs.clone(),
        timer.clone(),
        TIMING,
        boundary_config(),
    )
}

#[tokio::test]
async fn walks_a_full_epoch_transition() {
    common::init_tracing();

    let ledger = ScriptedLedger::new()
        .with_max_epochs([1, 2])
        .with_stake_rows(1, [100])
        .with_stake_rows(2, [50, 120, 120]);

    let procs = RecordingProcedures::new();
    let timer = ManualTimer::starting_at(1_500);
    let boundary = boundary(&ledger, &procs, &timer);

    let state = boundary.initial_state();
    assert_eq!(state, BoundaryState::WaitingSameEpoch { baseline: 1 });

    // sleeps until the wall clock crosses into epoch 2
    let state = boundary.advance(state).await.unwrap();
    assert_eq!(state, BoundaryState::WaitingSameEpoch { baseline: 1 });
    assert_eq!(timer.now(), 2_000);

    let state = boundary.advance(state).await.unwrap();
    assert_eq!(state, BoundaryState::EpochChanged { epoch: 2 });

    let state = boundary.advance(state).await.unwrap();
    assert_eq!(state, BoundaryState::AwaitingNewEpochRow { epoch: 2 });

    let state = boundary.advance(state).await.unwrap();
    assert_eq!(state, BoundaryState::AwaitingStakeSnapshotGrowth { epoch: 2 });

    let state = boundary.advance(state).await.unwrap();
    assert_eq!(
        state,
        BoundaryState::AwaitingStakeSnapshotStability { epoch: 2, rows: 120 }
    );

    let state = boundary.advance(state).await.unwrap();
    assert_eq!(state, BoundaryState::RunningPipeline { epoch: 2 });

    assert!(procs.calls().is_empty());

    let state = boundary.advance(state).await.unwrap();
    assert_eq!(state, BoundaryState::WaitingSameEpoch { baseline: 2 });

    assert_eq!(procs.names(), PIPELINE_CALLS);
    assert_eq!(
        procs.calls_to("insert_pool_stats_for_epoch")[0].args,
        vec![Some(2)]
    );

    assert_eq!(
        timer.sleeps(),
        vec![
            Duration::from_secs(500),
            SETTLE,
            // ledger still on epoch 1
            POLL,
            // snapshot smaller than the previous one
            POLL,
            // stability confirmation
            POLL,
        ]
    );
}

#[tokio::test]
async fn growth_ends_when_snapshot_stops_moving() {
    let ledger = ScriptedLedger::new()
        .with_stake_rows(1, [200])
        .with_stake_rows(2, [100, 100, 100]);

    let procs = RecordingProcedures::new();
    let timer = ManualTimer::starting_at(2_000);
    let boundary = boundary(&ledger, &procs, &timer);

    let state = boundary
        .advance(BoundaryState::AwaitingStakeSnapshotGrowth { epoch: 2 })
        .await
        .unwrap();

    assert_eq!(
        state,
        BoundaryState::AwaitingStakeSnapshotStability { epoch: 2, rows: 100 }
    );

    assert_eq!(ledger.stake_row_calls(2), 3);
    assert_eq!(timer.sleeps(), vec![POLL, POLL]);
}

#[tokio::test]
async fn empty_snapshot_stops_the_growth_wait() {
    let ledger = ScriptedLedger::new()
        .with_stake_rows(1, [0])
        .with_stake_rows(2, [0, 0, 0]);

    let procs = RecordingProcedures::new();

    // a budget far beyond what the wait needs, running out means it hung
    let timer = ManualTimer::with_sleep_budget(2_000, 50);
    let boundary = boundary(&ledger, &procs, &timer);

    let state = boundary
        .advance(BoundaryState::AwaitingStakeSnapshotGrowth { epoch: 2 })
        .await
        .unwrap();

    assert_eq!(
        state,
        BoundaryState::AwaitingStakeSnapshotStability { epoch: 2, rows: 0 }
    );

    assert_eq!(ledger.stake_row_calls(2), 3);
    assert_eq!(timer.sleeps(), vec![POLL, POLL]);
    assert!(!timer.is_cancelled());
}

#[tokio::test]
async fn stuck_wait_warns_once_and_keeps_waiting() {
    let (warnings, _guard) = common::count_warnings();

    let ledger = ScriptedLedger::new().with_max_epochs([1, 1, 1, 1, 1, 2]);
    let procs = RecordingProcedures::new();
    let timer = ManualTimer::starting_at(2_000);

    let mut config = boundary_config();
    config.stuck_alarm_secs = 1_000;

    let boundary = EpochBoundary::new(ledger, procs, timer.clone(), TIMING, config);

    let state = boundary
        .advance(BoundaryState::AwaitingNewEpochRow { epoch: 2 })
        .await
        .unwrap();

    assert_eq!(state, BoundaryState::AwaitingStakeSnapshotGrowth { epoch: 2 });
    assert_eq!(timer.sleeps(), vec![POLL; 5]);
    assert_eq!(warnings.count(), 1);
}

#[tokio::test]
async fn stability_restarts_when_rows_move() {
    let ledger = ScriptedLedger::new().with_stake_rows(2, [125, 130, 130]);

    let procs = RecordingProcedures::new();
    let timer = ManualTimer::starting_at(2_000);
    let boundary = boundary(&ledger, &procs, &timer);

    let state = boundary
        .advance(BoundaryState::AwaitingStakeSnapshotStability { epoch: 2, rows: 120 })
        .await
        .unwrap();

    assert_eq!(state, BoundaryState::RunningPipeline { epoch: 2 });
    assert_eq!(timer.sleeps(), vec![POLL, POLL, POLL]);
}

#[tokio::test]
async fn ledger_row_wait_tolerates_ledger_ahead() {
    let ledger = ScriptedLedger::new().with_max_epochs([3]);

    let procs = RecordingProcedures::new();
    let timer = ManualTimer::starting_at(2_000);
    let boundary = boundary(&ledger, &procs, &timer);

    let state = boundary
        .advance(BoundaryState::AwaitingNewEpochRow { epoch: 2 })
        .await
        .unwrap();

    assert_eq!(state, BoundaryState::AwaitingStakeSnapshotGrowth { epoch: 2 });
    assert!(timer.sleeps().is_empty());
}

#[tokio::test]
async fn failed_step_skips_the_epoch() {
    let ledger = ScriptedLedger::new();
    let procs = RecordingProcedures::new();
    procs.fail_on("rebuild_pool_stats_cache", TestFault::Query);

    let timer = ManualTimer::starting_at(2_000);
    let boundary = boundary(&ledger, &procs, &timer);

    let state = boundary
        .advance(BoundaryState::RunningPipeline { epoch: 2 })
        .await
        .unwrap();

    assert_eq!(state, BoundaryState::WaitingSameEpoch { baseline: 2 });
    assert_eq!(procs.names(), &PIPELINE_CALLS[..3]);

    // the next transition waits for epoch 3, epoch 2 is never retried
    let state = boundary.advance(state).await.unwrap();
    assert_eq!(state, BoundaryState::WaitingSameEpoch { baseline: 2 });
    assert_eq!(timer.now(), 3_000);
    assert_eq!(procs.names().len(), 3);
}

#[tokio::test]
async fn lost_connection_is_fatal() {
    let ledger = ScriptedLedger::new();
    let procs = RecordingProcedures::new();
    procs.fail_on("rebuild_asset_cache", TestFault::Connection);

    let timer = ManualTimer::starting_at(2_000);
    let boundary = boundary(&ledger, &procs, &timer);

    let err = boundary
        .advance(BoundaryState::RunningPipeline { epoch: 2 })
        .await
        .unwrap_err();

    assert!(err.is_connection());
}

#[tokio::test]
async fn custom_pipeline_runs_in_given_order() {
    let ledger = ScriptedLedger::new();
    let procs = RecordingProcedures::new();
    let timer = ManualTimer::starting_at(2_000);

    let boundary = boundary(&ledger, &procs, &timer).with_pipeline(vec![
        PipelineStep::PoolParams,
        PipelineStep::PoolStatsPerEpoch,
    ]);

    let report = boundary.run_pipeline(7).await.unwrap();

    assert_eq!(
        report.names(),
        vec!["pool-params", "pool-stats-per-epoch"]
    );
    assert_eq!(
        procs.names(),
        vec!["upsert_missing_pool_params", "insert_pool_stats_for_epoch"]
    );
}

#[tokio::test]
async fn run_stops_on_cancellation() {
    common::init_tracing();

    let ledger = ScriptedLedger::new()
        .with_max_epochs([2])
        .with_stake_rows(1, [100])
        .with_stake_rows(2, [150]);

    let procs = RecordingProcedures::new();

    // settle, stability, wait for epoch 3; the fourth sleep cancels
    let timer = ManualTimer::with_sleep_budget(2_100, 3);

    let mut config = boundary_config();
    config.run_on_start = true;

    let boundary = EpochBoundary::new(ledger, procs.clone(), timer.clone(), TIMING, config);

    boundary.run().await.unwrap();

    assert!(timer.is_cancelled());
    assert_eq!(procs.names(), PIPELINE_CALLS);
    assert_eq!(timer.sleeps(), vec![SETTLE, POLL, Duration::from_secs(240)]);
}

#[tokio::test]
async fn run_returns_fatal_errors() {
    let ledger = ScriptedLedger::new();
    ledger.set_fault(TestFault::Connection);

    let procs = RecordingProcedures::new();
    let timer = ManualTimer::starting_at(2_100);

    let mut config = boundary_config();
    config.run_on_start = true;

    let boundary = EpochBoundary::new(ledger, procs.clone(), timer, TIMING, config);

    let err = boundary.run().await.unwrap_err();

    assert!(err.is_connection());
    assert!(procs.calls().is_empty());
}

proptest! {
    #[test]
    fn position_brackets_now(now in 0u64..10_000_000_000, length in 1u64..1_000_000) {
        let timing = cbi_cardano::EpochTiming {
            genesis_start: 1_000,
            epoch_length: length,
        };

        let position = timing.position(now);

        prop_assert!(position.next_epoch_start > now);

        if now >= timing.genesis_start {
            prop_assert!(position.remaining(now).as_secs() <= length);
            prop_assert!(timing.epoch_start(position.epoch) <= now);
            prop_assert_eq!(position.next_epoch_start, timing.epoch_start(position.epoch + 1));
        }
    }
}
