use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use log::{debug, info};
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Idle,
    Armed { fires_at: Instant },
    Firing,
}

/// Recurring-run configuration, owned by whoever drives the runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub enabled: bool,
    pub period: Duration,
}

impl Schedule {
    pub fn disabled() -> Self {
        Schedule {
            enabled: false,
            period: Duration::from_secs(3600),
        }
    }

    pub fn every(period: Duration) -> Self {
        Schedule { enabled: true, period }
    }
}

struct Inner {
    generation: u64,
    state: ScheduleState,
    timer: Option<CancellationToken>,
}

/// Runs a job once after a delay. At most one job is armed at any time:
/// arming again replaces the pending one, and disarming is idempotent.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                state: ScheduleState::Idle,
                timer: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ScheduleState {
        self.lock().state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state(), ScheduleState::Armed { .. })
    }

    /// Time left before the armed job fires.
    pub fn remaining(&self) -> Option<Duration> {
        match self.state() {
            ScheduleState::Armed { fires_at } => Some(fires_at.saturating_duration_since(Instant::now())),
            _ => None,
        }
    }

    /// Run `job` after `delay`. May be called from inside a firing job.
    pub fn arm<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let fires_at = Instant::now() + delay;
        let token = CancellationToken::new();
        let generation = {
            let mut inner = self.lock();
            if let Some(previous) = inner.timer.take() {
                debug!("Replacing the armed schedule");
                previous.cancel();
            }
            inner.generation += 1;
            inner.state = ScheduleState::Armed { fires_at };
            inner.timer = Some(token.clone());
            inner.generation
        };
        info!("⏰ Next run scheduled in {}s", delay.as_secs());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep_until(fires_at) => {}
            }
            {
                let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if inner.generation != generation || token.is_cancelled() {
                    return;
                }
                inner.state = ScheduleState::Firing;
                inner.timer = None;
            }
            info!("⏰ Scheduled run starting");
            job().await;

            let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // The job may have armed a new run in the meantime.
            if inner.generation == generation && inner.state == ScheduleState::Firing {
                inner.state = ScheduleState::Idle;
            }
        });
    }

    /// Cancel the armed job, if any. Returns whether something was disarmed.
    pub fn disarm(&self) -> bool {
        let mut inner = self.lock();
        match inner.timer.take() {
            Some(token) => {
                token.cancel();
                inner.generation += 1;
                inner.state = ScheduleState::Idle;
                info!("Schedule stopped");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> BoxFuture<'static, ()> + Send + 'static {
        let counter = counter.clone();
        move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_fires_after_delay() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.arm(Duration::from_secs(60), counting_job(&counter));
        assert!(scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), ScheduleState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_is_idempotent() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.arm(Duration::from_secs(10), counting_job(&counter));

        assert!(scheduler.disarm());
        assert!(!scheduler.disarm());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state(), ScheduleState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arming_again_replaces_previous() {
        let scheduler = Scheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        scheduler.arm(Duration::from_secs(10), counting_job(&first));
        scheduler.arm(Duration::from_secs(30), counting_job(&second));

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
