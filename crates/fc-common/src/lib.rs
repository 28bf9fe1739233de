//! Shared domain types and infrastructure for the weather alert bridge.
//!
//! - [`event`]: `WarningEvent`, `EventFingerprint`, region name resolution.
//! - [`clock`]: an injectable clock so time-sensitive logic is testable.
//! - [`ratelimit`]: a `governor`-backed token bucket that never holds a
//!   lock across its wait.
//! - [`redact`]: masking of API keys and webhook tokens before logging.
//! - [`atomic_file`]: write-temp-then-rename helper shared by the state
//!   store and the health store.

pub mod atomic_file;
pub mod clock;
pub mod event;
pub mod ratelimit;
pub mod redact;

pub use clock::Clock;
pub use event::{EventFingerprint, WarningEvent};
pub use ratelimit::RateLimiter;

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CommonError>;
