//! Durable dedup state for tracked warning events.
//!
//! Two interchangeable backends share the [`StateStore`] contract: a
//! single-document JSON file (`file_backend`) and an embedded SQLite
//! database (`sqlite_backend`). Both apply the same atomicity and
//! corruption-recovery rules, scaled down to an embedded store.

pub mod file_backend;
pub mod migrate;
pub mod record;
pub mod sqlite_backend;
pub mod verify;

pub use file_backend::FileStateStore;
pub use record::TrackedRecord;
pub use sqlite_backend::SqliteStateStore;
pub use verify::{verify_integrity, IntegrityReport};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fc_common::WarningEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Shared contract implemented by both state-store backends.
///
/// Every write is atomic against crashes and serialized against
/// concurrent writers within this process; cross-process concurrent
/// writers are out of contract.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Inserts or updates the given events, keyed by fingerprint. An
    /// existing row's `first_seen_at` and `sent` flag are preserved;
    /// `payload`/`updated_at` only change when the payload actually
    /// changed.
    async fn upsert(&self, events: &[WarningEvent]) -> Result<()>;

    /// All rows with `sent = false`.
    async fn list_pending(&self) -> Result<Vec<TrackedRecord>>;

    /// Every row, sent or not.
    async fn list_all(&self) -> Result<Vec<TrackedRecord>>;

    /// Marks the given fingerprints as sent, stamping `last_sent_at`.
    async fn mark_sent(&self, event_ids: &[String], at: DateTime<Utc>) -> Result<()>;

    /// Deletes rows whose `updated_at` is older than `older_than`.
    /// Unsent rows are preserved unless `include_unsent` is set.
    async fn cleanup_stale(&self, older_than: DateTime<Utc>, include_unsent: bool) -> Result<u64>;

    /// Count of rows with `sent = false`.
    async fn count_pending(&self) -> Result<u64>;
}
