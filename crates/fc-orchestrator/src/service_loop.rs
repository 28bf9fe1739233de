//! Drives [`CycleOrchestrator`] on an interval derived from the health
//! monitor, runs the daily cleanup, and handles health-transition
//! notifications and bounded recovery backfill.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use fc_common::Clock;
use fc_health::{consume_backfill_segments, evaluate, CycleOutcome, HealthEvent, HealthStore, HealthThresholds};
use fc_message::MessageBuilder;
use fc_notify::Notifier;
use fc_state::StateStore;
use tracing::{error, info, warn};

use crate::cycle::{CycleError, CycleOrchestrator};

/// Consecutive per-cycle state-store failures before the loop gives up
/// and escalates to a fatal shutdown, per the `state_io_error` taxonomy's
/// "escalates to fatal only on backup+persist chained failure" clause.
const STATE_FAILURE_FATAL_THRESHOLD: u32 = 5;

pub struct ServiceLoopConfig {
    pub region_codes: Vec<String>,
    pub lookback_days: i64,
    pub run_once: bool,
    pub shutdown_grace: Duration,
    pub cleanup_enabled: bool,
    pub cleanup_retention_days: i64,
    pub cleanup_include_unsent: bool,
    pub thresholds: HealthThresholds,
}

pub struct ServiceLoop {
    config: ServiceLoopConfig,
    orchestrator: CycleOrchestrator,
    health_store: HealthStore,
    state_store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    message_builder: Arc<MessageBuilder>,
    clock: Arc<dyn Clock>,
    cancel: Arc<tokio::sync::Notify>,
    shutdown: tokio::sync::broadcast::Receiver<()>,
}

/// Why the loop stopped, distinguishing a clean shutdown from a fatal
/// condition that should set a non-zero exit code.
pub enum StopReason {
    RunOnceComplete,
    ShutdownSignal,
    Fatal(String),
}

impl ServiceLoop {
    pub fn new(
        config: ServiceLoopConfig,
        orchestrator: CycleOrchestrator,
        health_store: HealthStore,
        state_store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
        message_builder: Arc<MessageBuilder>,
        clock: Arc<dyn Clock>,
        cancel: Arc<tokio::sync::Notify>,
        shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            health_store,
            state_store,
            notifier,
            message_builder,
            clock,
            cancel,
            shutdown,
        }
    }

    pub async fn run(&mut self) -> StopReason {
        let mut rotation_offset = 0usize;
        let mut last_cleanup_day: Option<(i32, u32, u32)> = None;
        let mut consecutive_state_failures = 0u32;

        loop {
            if self.shutdown.try_recv().is_ok() {
                info!(event = "shutdown.interrupt");
                return StopReason::ShutdownSignal;
            }

            let now = self.clock.now();
            info!(event = "cycle.start", now = %now);

            let health_state = self.health_store.current();
            let from_date = now - chrono::Duration::days(self.config.lookback_days);

            match self.orchestrator.run_cycle(from_date, now, rotation_offset).await {
                Ok((report, next_offset)) => {
                    consecutive_state_failures = 0;
                    rotation_offset = next_offset;
                    self.handle_cycle_settlement(&health_state, &report, now).await;
                }
                Err(CycleError::State(err)) => {
                    consecutive_state_failures += 1;
                    error!(
                        event = "cycle.iteration.failed",
                        error = %err,
                        consecutive_failures = consecutive_state_failures,
                    );
                    if consecutive_state_failures >= STATE_FAILURE_FATAL_THRESHOLD {
                        return StopReason::Fatal(format!(
                            "state store failed {consecutive_state_failures} cycles in a row: {err}"
                        ));
                    }
                    let wait = Duration::from_secs(1);
                    self.clock.sleep(wait, &self.cancel).await;
                    continue;
                }
            }

            if self.config.cleanup_enabled {
                let day_key = (now.year(), now.month(), now.day());
                if last_cleanup_day != Some(day_key) {
                    self.run_daily_cleanup(now).await;
                    last_cleanup_day = Some(day_key);
                }
            }

            if self.config.run_once {
                info!(event = "shutdown.run_once_complete");
                return StopReason::RunOnceComplete;
            }

            let interval = self.health_store.current().suggested_interval_sec.max(1);
            info!(event = "cycle.interval.adjusted", interval_sec = interval);
            self.clock
                .sleep(Duration::from_secs(interval), &self.cancel)
                .await;
        }
    }

    async fn handle_cycle_settlement(
        &mut self,
        health_state_before: &fc_health::HealthState,
        report: &crate::cycle::CycleReport,
        now: DateTime<Utc>,
    ) {
        let error_codes: Vec<String> = report.error_code_histogram.keys().cloned().collect();
        let outcome = CycleOutcome::from_area_counts(
            now,
            report.area_failure_count,
            report.area_total_count,
            self.config.thresholds.outage_fail_ratio_threshold,
            error_codes,
        );

        let (mut new_state, events) = evaluate(health_state_before, outcome, now, &self.config.thresholds);
        info!(event = "health.evaluate", incident_open = new_state.incident_open);

        for health_event in &events {
            self.send_health_notification(health_event).await;
        }

        if let Some(HealthEvent::Recovered { .. }) = events.iter().find(|e| matches!(e, HealthEvent::Recovered { .. })) {
            self.run_backfill_segments(&mut new_state).await;
        }

        if let Err(err) = self.health_store.persist(new_state) {
            error!(event = "state.persist_failed", error = %err);
        }
    }

    async fn send_health_notification(&self, event: &HealthEvent) {
        let payload = self.message_builder.build_health_message(event);
        let payload_json = serde_json::to_value(&payload).unwrap_or_default();
        match self.notifier.send(&payload_json).await {
            Ok(()) => info!(event = "health.notification.sent"),
            Err(err) => warn!(event = "health.notification.failed", error = %err),
        }
    }

    async fn run_backfill_segments(&self, state: &mut fc_health::HealthState) {
        let segments = consume_backfill_segments(state, self.config.thresholds.max_windows_per_cycle);
        if segments.is_empty() {
            return;
        }
        info!(event = "health.backfill.start", segment_count = segments.len());
        for segment in segments {
            match self
                .orchestrator
                .run_cycle(segment.from_date, segment.to_date, 0)
                .await
            {
                Ok(_) => info!(event = "health.backfill.complete", from = %segment.from_date, to = %segment.to_date),
                Err(err) => warn!(event = "health.backfill.failed", error = %err),
            }
        }
    }

    async fn run_daily_cleanup(&self, now: DateTime<Utc>) {
        let older_than = now - chrono::Duration::days(self.config.cleanup_retention_days);
        match self
            .state_store
            .cleanup_stale(older_than, self.config.cleanup_include_unsent)
            .await
        {
            Ok(removed) => info!(event = "state.cleanup.auto", removed),
            Err(err) => error!(event = "state.cleanup.failed", error = %err),
        }
    }
}
