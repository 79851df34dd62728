use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use cbi_core::{JobError, Timer, Timestamp};

#[derive(Debug)]
struct Inner {
    now: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
    budget: Option<usize>,
    cancel: CancellationToken,
}

/// A clock that only moves when someone sleeps on it.
///
/// Sleeping returns immediately after advancing the clock. Once the optional
/// sleep budget is spent the timer cancels itself, which is how tests stop
/// the endless job loops.
#[derive(Debug, Clone)]
pub struct ManualTimer {
    inner: Arc<Inner>,
}

impl ManualTimer {
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            inner: Arc::new(Inner {
                now: AtomicU64::new(now),
                sleeps: Mutex::new(vec![]),
                budget: None,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn with_sleep_budget(now: Timestamp, budget: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                now: AtomicU64::new(now),
                sleeps: Mutex::new(vec![]),
                budget: Some(budget),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.inner.now.fetch_add(duration.as_secs(), Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.sleeps.lock().unwrap().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> Timestamp {
        self.inner.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) -> Result<(), JobError> {
        if self.inner.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let mut sleeps = self.inner.sleeps.lock().unwrap();

        if self.inner.budget.is_some_and(|x| sleeps.len() >= x) {
            self.inner.cancel.cancel();
            return Err(JobError::Cancelled);
        }

        sleeps.push(duration);
        self.advance(duration);

        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleeping_moves_the_clock() {
        let timer = ManualTimer::starting_at(1_000);

        timer.sleep(Duration::from_secs(60)).await.unwrap();
        timer.sleep(Duration::from_secs(600)).await.unwrap();

        assert_eq!(timer.now(), 1_660);
        assert_eq!(timer.total_slept(), Duration::from_secs(660));
    }

    #[tokio::test]
    async fn budget_cancels() {
        let timer = ManualTimer::with_sleep_budget(0, 1);

        timer.sleep(Duration::from_secs(1)).await.unwrap();

        let err = timer.sleep(Duration::from_secs(1)).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(timer.is_cancelled());
        assert_eq!(timer.sleeps().len(), 1);
    }
}
