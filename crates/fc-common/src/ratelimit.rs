//! Token-bucket pacing shared by the weather client and the notifier.
//!
//! A standalone component built on `governor` that never holds a lock
//! while a caller is waiting for a token — waiters just poll `check()`
//! and back off, so parallel callers never starve each other behind a
//! held mutex.

use governor::{
    clock::{Clock as GovernorClock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

enum Inner {
    Unlimited,
    Limited(GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>),
}

/// A global pacing primitive. `requests_per_sec == 0` disables limiting
/// entirely.
pub struct RateLimiter {
    inner: Inner,
}

impl RateLimiter {
    pub fn new(requests_per_sec: u32) -> Self {
        let inner = match NonZeroU32::new(requests_per_sec) {
            Some(nz) => Inner::Limited(GovernorRateLimiter::direct(Quota::per_second(nz))),
            None => Inner::Unlimited,
        };
        Self { inner }
    }

    /// Waits for the next available token, honoring cooperative
    /// cancellation. Never holds a lock during the wait: each poll
    /// acquires nothing but the limiter's own lock-free state check.
    pub async fn acquire(&self, cancel: &tokio::sync::Notify) {
        let limiter = match &self.inner {
            Inner::Unlimited => return,
            Inner::Limited(l) => l,
        };

        loop {
            match limiter.check() {
                Ok(_) => return,
                Err(not_until) => {
                    let wait = not_until
                        .wait_time_from(DefaultClock::default().now())
                        .max(Duration::from_millis(1));
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.notified() => return,
                    }
                }
            }
        }
    }
}
