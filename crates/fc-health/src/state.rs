use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One cycle's contribution to the rolling health window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub timestamp: DateTime<Utc>,
    pub severe_failure: bool,
    pub fail_ratio: f64,
    pub error_codes: Vec<String>,
}

impl CycleOutcome {
    pub fn from_area_counts(
        timestamp: DateTime<Utc>,
        area_failure_count: u32,
        area_total_count: u32,
        outage_fail_ratio_threshold: f64,
        error_codes: Vec<String>,
    ) -> Self {
        let fail_ratio = if area_total_count == 0 {
            0.0
        } else {
            area_failure_count as f64 / area_total_count as f64
        };
        Self {
            timestamp,
            severe_failure: fail_ratio >= outage_fail_ratio_threshold,
            fail_ratio,
            error_codes,
        }
    }
}

/// Thresholds governing the outage/recovery state machine.
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub base_interval_sec: u64,
    pub outage_window_sec: i64,
    pub outage_min_failed_cycles: u32,
    pub outage_consecutive_failures: u32,
    pub outage_fail_ratio_threshold: f64,
    pub recovery_window_sec: i64,
    pub recovery_max_fail_ratio: f64,
    pub recovery_consecutive_successes: u32,
    pub heartbeat_interval_sec: i64,
    pub backoff_max_sec: u64,
    pub backfill_window_days: u32,
    pub max_windows_per_cycle: u32,
    pub recovery_backfill_max_days: u32,
}

/// A remaining historical window the recovery backfill still owes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackfillSegment {
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
}

/// Persisted upstream-health state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthState {
    pub incident_open: bool,
    pub incident_opened_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_recovery_at: Option<DateTime<Utc>>,
    pub window: VecDeque<CycleOutcome>,
    pub consecutive_severe_failures: u32,
    pub consecutive_stable_cycles: u32,
    pub backfill_cursor: Vec<BackfillSegment>,
    pub suggested_interval_sec: u64,
}

impl HealthState {
    pub fn healthy(base_interval_sec: u64) -> Self {
        Self {
            incident_open: false,
            incident_opened_at: None,
            last_heartbeat_at: None,
            last_recovery_at: None,
            window: VecDeque::new(),
            consecutive_severe_failures: 0,
            consecutive_stable_cycles: 0,
            backfill_cursor: Vec::new(),
            suggested_interval_sec: base_interval_sec,
        }
    }
}

/// Emitted on a state transition; `NoEvent` cycles emit nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    OutageDetected,
    OutageHeartbeat,
    Recovered { backfill_segments: usize },
}
