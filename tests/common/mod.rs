#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{subscriber::DefaultGuard, Event, Level, Subscriber};
use tracing_subscriber::{
    layer::{Context, SubscriberExt},
    EnvFilter, Layer,
};

use cbi_cardano::EpochTiming;
use cbi_core::config::BoundaryConfig;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Epochs of 1000 seconds starting at the unix epoch
pub const TIMING: EpochTiming = EpochTiming {
    genesis_start: 0,
    epoch_length: 1_000,
};

pub const SETTLE: Duration = Duration::from_secs(60);
pub const POLL: Duration = Duration::from_secs(600);

pub fn boundary_config() -> BoundaryConfig {
    BoundaryConfig {
        settle_delay_secs: SETTLE.as_secs(),
        poll_interval_secs: POLL.as_secs(),
        growth_stable_polls: 2,
        stability_confirm_polls: 1,
        run_on_start: false,
        ..Default::default()
    }
}

/// Counts `WARN` events, used to check alarms that only log
#[derive(Clone, Default)]
pub struct WarnCounter(Arc<AtomicUsize>);

impl WarnCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Route this thread's events through a fresh [`WarnCounter`]
pub fn count_warnings() -> (WarnCounter, DefaultGuard) {
    let counter = WarnCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());

    (counter, tracing::subscriber::set_default(subscriber))
}
