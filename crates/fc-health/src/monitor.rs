//! Pure evaluation of the health state machine:
//! `(previous state, outcome, now) -> (new state, emitted events)`, with
//! no I/O, so the whole transition table is unit-testable without a
//! clock mock or a running service.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::state::{BackfillSegment, CycleOutcome, HealthEvent, HealthState, HealthThresholds};

fn prune_window(window: &mut std::collections::VecDeque<CycleOutcome>, now: DateTime<Utc>, horizon_sec: i64) {
    while let Some(front) = window.front() {
        if (now - front.timestamp) > ChronoDuration::seconds(horizon_sec) {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn window_fail_ratio(window: &std::collections::VecDeque<CycleOutcome>, now: DateTime<Utc>, horizon_sec: i64) -> f64 {
    let in_window: Vec<&CycleOutcome> = window
        .iter()
        .filter(|o| (now - o.timestamp) <= ChronoDuration::seconds(horizon_sec))
        .collect();
    if in_window.is_empty() {
        return 0.0;
    }
    in_window.iter().map(|o| o.fail_ratio).sum::<f64>() / in_window.len() as f64
}

fn severe_count_in_window(window: &std::collections::VecDeque<CycleOutcome>, now: DateTime<Utc>, horizon_sec: i64) -> u32 {
    window
        .iter()
        .filter(|o| (now - o.timestamp) <= ChronoDuration::seconds(horizon_sec) && o.severe_failure)
        .count() as u32
}

/// Evaluates one cycle outcome against the current state, returning the
/// successor state and any transition events fired.
pub fn evaluate(
    state: &HealthState,
    outcome: CycleOutcome,
    now: DateTime<Utc>,
    thresholds: &HealthThresholds,
) -> (HealthState, Vec<HealthEvent>) {
    let mut next = state.clone();
    let mut events = Vec::new();

    let horizon = thresholds.outage_window_sec.max(thresholds.recovery_window_sec);
    next.window.push_back(outcome.clone());
    prune_window(&mut next.window, now, horizon);

    if outcome.severe_failure {
        next.consecutive_severe_failures += 1;
        next.consecutive_stable_cycles = 0;
    } else {
        next.consecutive_stable_cycles += 1;
        next.consecutive_severe_failures = 0;
    }

    if !next.incident_open {
        let severe_in_window = severe_count_in_window(&next.window, now, thresholds.outage_window_sec);
        let outage_detected = severe_in_window >= thresholds.outage_min_failed_cycles
            && next.consecutive_severe_failures >= thresholds.outage_consecutive_failures;

        if outage_detected {
            next.incident_open = true;
            next.incident_opened_at = Some(now);
            next.last_heartbeat_at = Some(now);
            events.push(HealthEvent::OutageDetected);
        }
    } else {
        let fail_ratio = window_fail_ratio(&next.window, now, thresholds.recovery_window_sec);
        let recovered = fail_ratio <= thresholds.recovery_max_fail_ratio
            && next.consecutive_stable_cycles >= thresholds.recovery_consecutive_successes;

        if recovered {
            let incident_start = next.incident_opened_at.unwrap_or(now);
            let duration = (now - incident_start).max(ChronoDuration::zero());
            let capped = duration.min(ChronoDuration::days(
                thresholds.recovery_backfill_max_days as i64,
            ));
            let segments = split_into_segments(
                incident_start,
                now,
                capped,
                thresholds.backfill_window_days,
            );

            next.incident_open = false;
            next.last_recovery_at = Some(now);
            next.consecutive_severe_failures = 0;
            next.consecutive_stable_cycles = 0;
            next.backfill_cursor = segments.clone();
            events.push(HealthEvent::Recovered {
                backfill_segments: segments.len(),
            });
        } else {
            let since_heartbeat = next
                .last_heartbeat_at
                .map(|t| now - t)
                .unwrap_or_else(|| ChronoDuration::seconds(thresholds.heartbeat_interval_sec));
            if since_heartbeat >= ChronoDuration::seconds(thresholds.heartbeat_interval_sec) {
                next.last_heartbeat_at = Some(now);
                events.push(HealthEvent::OutageHeartbeat);
            }
        }
    }

    next.suggested_interval_sec = if next.incident_open {
        let scaled = thresholds
            .base_interval_sec
            .saturating_mul(1u64 << next.consecutive_severe_failures.min(32));
        scaled.min(thresholds.backoff_max_sec)
    } else {
        thresholds.base_interval_sec
    };

    (next, events)
}

fn split_into_segments(
    incident_start: DateTime<Utc>,
    recovered_at: DateTime<Utc>,
    capped_duration: ChronoDuration,
    window_days: u32,
) -> Vec<BackfillSegment> {
    if capped_duration <= ChronoDuration::zero() || window_days == 0 {
        return Vec::new();
    }
    let window_start = recovered_at - capped_duration;
    let window = ChronoDuration::days(window_days as i64);

    let mut segments = Vec::new();
    let mut cursor = window_start.max(incident_start);
    while cursor < recovered_at {
        let end = (cursor + window).min(recovered_at);
        segments.push(BackfillSegment {
            from_date: cursor,
            to_date: end,
        });
        cursor = end;
    }
    segments
}

/// Pops up to `max_windows_per_cycle` segments off the front of the
/// backfill cursor, returning them to run as extra cycles; the
/// remainder survives for the next cycle (and a process restart, since
/// it lives in `HealthState`).
pub fn consume_backfill_segments(
    state: &mut HealthState,
    max_windows_per_cycle: u32,
) -> Vec<BackfillSegment> {
    let take = (max_windows_per_cycle as usize).min(state.backfill_cursor.len());
    state.backfill_cursor.drain(0..take).collect()
}
