//! Warning events and their dedup fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Announce / continue / update / release, as reported by the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCode {
    Announce,
    Continue,
    Update,
    Release,
}

/// One warning observation from upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningEvent {
    pub region_code: String,
    pub region_name: String,
    pub kind_code: String,
    pub level_code: String,
    pub action_code: ActionCode,
    pub cancel_flag: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub announce_time: Option<DateTime<Utc>>,
    pub station_id: Option<String>,
    pub announce_seq: Option<u32>,
    pub report_url: Option<String>,
}

impl WarningEvent {
    /// Computes the dedup key for this event.
    ///
    /// Primary: `(station_id, announce_time, announce_seq, action_code,
    /// cancel_flag)` when all primary components are present. Fallback:
    /// a stable hash over region/kind/level/action/cancel/start/end/announce.
    pub fn fingerprint(&self) -> EventFingerprint {
        match (self.station_id.as_ref(), self.announce_time, self.announce_seq) {
            (Some(station_id), Some(announce_time), Some(seq)) => EventFingerprint::primary(
                station_id,
                announce_time,
                seq,
                self.action_code,
                self.cancel_flag,
            ),
            _ => EventFingerprint::fallback_hash(self),
        }
    }

    /// Builds `report_url` only when station_id, announce_time, and
    /// announce_seq are all present and the assembled URL validates.
    /// Returns `None` with a caller-visible reason when blocked, so the
    /// orchestrator can emit `notification.url_attachment_blocked`.
    pub fn build_report_url(&self, base_url: &str) -> Result<Option<String>, &'static str> {
        let (station_id, announce_time, seq) = match (
            self.station_id.as_ref(),
            self.announce_time,
            self.announce_seq,
        ) {
            (Some(s), Some(t), Some(n)) => (s, t, n),
            _ => return Err("missing station_id/announce_time/announce_seq"),
        };
        let candidate = format!(
            "{}?stnId={}&tmFc={}&seq={}",
            base_url.trim_end_matches('/'),
            station_id,
            announce_time.format("%Y%m%d%H%M"),
            seq
        );
        match url::Url::parse(&candidate) {
            Ok(_) => Ok(Some(candidate)),
            Err(_) => Err("assembled report URL failed validation"),
        }
    }
}

/// Stable per-event dedup key, canonical across restarts and both state
/// store backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFingerprint(String);

impl EventFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn primary(
        station_id: &str,
        announce_time: DateTime<Utc>,
        announce_seq: u32,
        action_code: ActionCode,
        cancel_flag: bool,
    ) -> Self {
        Self(format!(
            "p:{}:{}:{}:{:?}:{}",
            station_id,
            announce_time.to_rfc3339(),
            announce_seq,
            action_code,
            cancel_flag
        ))
    }

    pub fn fallback_hash(event: &WarningEvent) -> Self {
        let canonical = format!(
            "{}|{}|{}|{:?}|{}|{}|{}|{}",
            event.region_code,
            event.kind_code,
            event.level_code,
            event.action_code,
            event.cancel_flag,
            event.start_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            event.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            event
                .announce_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(format!("f:{}", hex::encode(hasher.finalize())))
    }
}

impl std::fmt::Display for EventFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolves a human-readable region name: configured mapping first, then
/// the upstream-supplied name, then the raw region code.
pub fn resolve_region_name(
    region_code: &str,
    upstream_name: Option<&str>,
    region_map: &HashMap<String, String>,
) -> String {
    if let Some(mapped) = region_map.get(region_code) {
        return mapped.clone();
    }
    if let Some(name) = upstream_name {
        if !name.is_empty() {
            return name.to_string();
        }
    }
    region_code.to_string()
}
