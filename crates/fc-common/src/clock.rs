//! Injectable clock so retry backoff, health windows, and heartbeat
//! scheduling can be driven deterministically in tests.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Wall-clock + monotonic time source, plus a cancellation-aware sleep.
///
/// Every suspension point in the system goes through
/// `sleep`, so a fake clock can make tests run instantly while still
/// exercising the real wait/cancel code paths.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn monotonic(&self) -> Instant;

    /// Sleep for `dur`, or return early if `cancel` resolves first.
    async fn sleep(&self, dur: Duration, cancel: &tokio::sync::Notify) {
        tokio::select! {
            _ = tokio::time::sleep(dur) => {}
            _ = cancel.notified() => {}
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for tests: `now()` only advances when explicitly
/// told to via [`FakeClock::advance`], and `sleep` returns immediately
/// without actually waiting, so HealthMonitor / retry-backoff tests run
/// in microseconds instead of real time.
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    start: Instant,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            start: Instant::now(),
        }
    }

    pub fn advance(&self, dur: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(dur).unwrap_or_default();
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }
}

#[async_trait::async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn monotonic(&self) -> Instant {
        self.start
    }

    async fn sleep(&self, _dur: Duration, _cancel: &tokio::sync::Notify) {
        // Tests advance the fake clock explicitly; no real wait needed.
    }
}
