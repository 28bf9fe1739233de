use chrono::{DateTime, Utc};
use fc_common::WarningEvent;
use serde::{Deserialize, Serialize};

/// One row of the state store, keyed by the event's fingerprint.
///
/// Invariants: `sent ⇒ last_sent_at.is_some()`; `updated_at >=
/// first_seen_at`; re-upserting an existing fingerprint never regresses
/// `first_seen_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedRecord {
    pub event_id: String,
    pub payload: WarningEvent,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub sent: bool,
}

impl TrackedRecord {
    pub fn new(event_id: String, payload: WarningEvent, now: DateTime<Utc>) -> Self {
        Self {
            event_id,
            payload,
            first_seen_at: now,
            updated_at: now,
            last_sent_at: None,
            sent: false,
        }
    }

    /// Applies an incoming observation of the same fingerprint: keeps
    /// `first_seen_at` and `sent`/`last_sent_at`, only bumping
    /// `payload`/`updated_at` when the payload actually changed.
    pub fn merge_observation(&mut self, payload: WarningEvent, now: DateTime<Utc>) {
        if self.payload != payload {
            self.payload = payload;
            self.updated_at = now;
        }
    }
}
