//! Consecutive-failure circuit breaker guarding the webhook sender,
//! closed/open/half-open with a plain consecutive-failure counter
//! rather than a sliding window.
//!
//! The mutex guards counters and deadlines only; it is never held
//! across network I/O or a sleep.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    enabled: bool,
    failure_threshold: u32,
    open_duration: Duration,
    inner: Mutex<Inner>,
}

/// What the caller should do before attempting a send.
pub enum Admission {
    Proceed,
    FailFast,
}

impl CircuitBreaker {
    pub fn new(enabled: bool, failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            enabled,
            failure_threshold,
            open_duration,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Call before attempting a send. Transitions Open -> HalfOpen once
    /// the reset window has elapsed, admitting exactly one probe.
    pub fn admit(&self, now: DateTime<Utc>) -> Admission {
        if !self.enabled {
            return Admission::Proceed;
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed => Admission::Proceed,
            State::HalfOpen => Admission::Proceed,
            State::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now - at)
                    .unwrap_or(chrono::Duration::zero());
                if elapsed >= chrono::Duration::from_std(self.open_duration).unwrap_or_default() {
                    inner.state = State::HalfOpen;
                    Admission::Proceed
                } else {
                    warn!(event = "notification.circuit.blocked");
                    Admission::FailFast
                }
            }
        }
    }

    pub fn record_success(&self) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Closed {
            info!(event = "notification.circuit.closed");
        }
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(now);
                warn!(event = "notification.circuit.opened");
            }
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.opened_at = Some(now);
                    warn!(event = "notification.circuit.opened");
                }
            }
            State::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failures_and_blocks_until_reset() {
        let breaker = CircuitBreaker::new(true, 3, Duration::from_secs(60));
        let t0 = Utc::now();

        for _ in 0..2 {
            assert!(matches!(breaker.admit(t0), Admission::Proceed));
            breaker.record_failure(t0);
        }
        assert!(matches!(breaker.admit(t0), Admission::Proceed));
        breaker.record_failure(t0);

        assert!(matches!(breaker.admit(t0), Admission::FailFast));

        let later = t0 + chrono::Duration::seconds(61);
        assert!(matches!(breaker.admit(later), Admission::Proceed));
    }

    #[test]
    fn success_resets_failure_counter() {
        let breaker = CircuitBreaker::new(true, 3, Duration::from_secs(60));
        let t0 = Utc::now();
        breaker.record_failure(t0);
        breaker.record_failure(t0);
        breaker.record_success();
        breaker.record_failure(t0);
        assert!(matches!(breaker.admit(t0), Admission::Proceed));
    }

    #[test]
    fn disabled_breaker_never_blocks() {
        let breaker = CircuitBreaker::new(false, 1, Duration::from_secs(60));
        let t0 = Utc::now();
        breaker.record_failure(t0);
        breaker.record_failure(t0);
        assert!(matches!(breaker.admit(t0), Admission::Proceed));
    }
}
