//! The four-phase cycle: fetch, track, dispatch, settle.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fc_common::WarningEvent;
use fc_message::MessageBuilder;
use fc_notify::{NotifyError, Notifier};
use fc_state::{StateError, StateStore, TrackedRecord};
use fc_weather::{WeatherClient, WeatherError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("state store failure: {0}")]
    State(#[from] StateError),
}

#[derive(Debug, Default, Clone)]
pub struct RegionStats {
    pub fetched: u32,
    pub sent: u32,
    pub failed: u32,
}

#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub per_region: HashMap<String, RegionStats>,
    pub api_calls: u32,
    pub alerts_fetched: u32,
    pub attempts: u32,
    pub sent: u32,
    pub failures: u32,
    pub dry_run_skips: u32,
    pub backpressure_skips: u32,
    pub pending_total: u64,
    pub error_code_histogram: HashMap<String, u32>,
    /// area_failure_count / area_total_count for this cycle, feeding the
    /// health monitor directly.
    pub area_failure_count: u32,
    pub area_total_count: u32,
}

pub struct CycleOrchestratorConfig {
    pub region_codes: Vec<String>,
    pub area_interval_sec: u64,
    pub max_parallel_workers: usize,
    pub max_attempts_per_cycle: usize,
    pub dry_run: bool,
}

pub struct CycleOrchestrator {
    config: CycleOrchestratorConfig,
    weather_clients: Vec<Arc<dyn WeatherClient>>,
    state_store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    message_builder: Arc<MessageBuilder>,
    cancel: Arc<tokio::sync::Notify>,
}

impl CycleOrchestrator {
    /// `weather_clients` holds one entry per worker, each owning its own
    /// HTTP client; in sequential mode only the first is used.
    pub fn new(
        config: CycleOrchestratorConfig,
        weather_clients: Vec<Arc<dyn WeatherClient>>,
        state_store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
        message_builder: Arc<MessageBuilder>,
        cancel: Arc<tokio::sync::Notify>,
    ) -> Self {
        Self {
            config,
            weather_clients,
            state_store,
            notifier,
            message_builder,
            cancel,
        }
    }

    pub async fn run_cycle(
        &self,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
        rotation_offset: usize,
    ) -> Result<(CycleReport, usize), CycleError> {
        let mut report = CycleReport::default();

        // Phase 1: fetch.
        let fetched = self.fetch_phase(from_date, to_date, &mut report).await;

        // Phase 2: track.
        let all_events: Vec<WarningEvent> = fetched.into_values().flatten().collect();
        report.alerts_fetched = all_events.len() as u32;
        if !all_events.is_empty() {
            self.state_store.upsert(&all_events).await?;
        }

        // Phase 3: dispatch.
        let (sent_ids, regions_serviced) = self.dispatch_phase(rotation_offset, &mut report).await?;

        // Phase 4: settle.
        if !sent_ids.is_empty() {
            self.state_store.mark_sent(&sent_ids, Utc::now()).await?;
        }
        report.pending_total = self.state_store.count_pending().await?;

        info!(
            event = "cycle.cost.metrics",
            api_calls = report.api_calls,
            alerts_fetched = report.alerts_fetched,
            attempts = report.attempts,
            sent = report.sent,
            failures = report.failures,
            dry_run_skips = report.dry_run_skips,
            backpressure_skips = report.backpressure_skips,
            pending_total = report.pending_total,
        );
        info!(event = "cycle.complete", sent = report.sent, failures = report.failures);

        let next_offset = if self.config.region_codes.is_empty() {
            0
        } else {
            (rotation_offset + regions_serviced.max(1)) % self.config.region_codes.len()
        };
        Ok((report, next_offset))
    }

    async fn fetch_phase(
        &self,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> HashMap<String, Vec<WarningEvent>> {
        let mut results = HashMap::new();
        let regions = &self.config.region_codes;

        if self.config.max_parallel_workers <= 1 || self.weather_clients.len() <= 1 {
            for (idx, region) in regions.iter().enumerate() {
                if idx > 0 && self.config.area_interval_sec > 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(self.config.area_interval_sec)) => {}
                        _ = self.cancel.notified() => break,
                    }
                }
                self.fetch_one_region(region, from_date, to_date, &mut results, report)
                    .await;
            }
        } else {
            info!(event = "cycle.parallel_fetch", worker_count = self.weather_clients.len());
            info!(event = "cycle.area_interval_ignored");

            let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_workers));
            let mut handles = Vec::new();
            for (idx, region) in regions.iter().cloned().enumerate() {
                let client = self.weather_clients[idx % self.weather_clients.len()].clone();
                let semaphore = semaphore.clone();
                let from_date = from_date;
                let to_date = to_date;
                handles.push((
                    region.clone(),
                    tokio::spawn(async move {
                        let _permit = semaphore.acquire().await.expect("semaphore not closed");
                        client.fetch(&region, from_date, to_date).await
                    }),
                ));
            }

            for (region, handle) in handles {
                info!(event = "area.start", region_code = %region);
                match handle.await {
                    Ok(Ok(events)) => {
                        report.api_calls += 1;
                        report.area_total_count += 1;
                        let stats = report.per_region.entry(region.clone()).or_default();
                        stats.fetched = events.len() as u32;
                        results.insert(region, events);
                    }
                    Ok(Err(err)) => self.record_fetch_failure(&region, err, report),
                    Err(_join_error) => {
                        warn!(event = "area.failed", region_code = %region, reason = "missing_area_fetch_result");
                        report.area_failure_count += 1;
                        report.area_total_count += 1;
                        *report
                            .error_code_histogram
                            .entry("missing_area_fetch_result".to_string())
                            .or_insert(0) += 1;
                    }
                }
            }
        }

        results
    }

    async fn fetch_one_region(
        &self,
        region: &str,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
        results: &mut HashMap<String, Vec<WarningEvent>>,
        report: &mut CycleReport,
    ) {
        info!(event = "area.start", region_code = region);
        let client = &self.weather_clients[0];
        match client.fetch(region, from_date, to_date).await {
            Ok(events) => {
                report.api_calls += 1;
                report.area_total_count += 1;
                let stats = report.per_region.entry(region.to_string()).or_default();
                stats.fetched = events.len() as u32;
                results.insert(region.to_string(), events);
            }
            Err(err) => self.record_fetch_failure(region, err, report),
        }
    }

    fn record_fetch_failure(&self, region: &str, err: WeatherError, report: &mut CycleReport) {
        warn!(event = "area.failed", region_code = region, error = %err);
        report.area_failure_count += 1;
        report.area_total_count += 1;
        report.per_region.entry(region.to_string()).or_default().failed += 1;
        *report
            .error_code_histogram
            .entry(err.kind_label())
            .or_insert(0) += 1;
    }

    async fn dispatch_phase(
        &self,
        rotation_offset: usize,
        report: &mut CycleReport,
    ) -> Result<(Vec<String>, usize), CycleError> {
        let pending = self.state_store.list_pending().await?;
        let mut by_region: HashMap<String, VecDeque<TrackedRecord>> = HashMap::new();
        for record in pending {
            by_region
                .entry(record.payload.region_code.clone())
                .or_default()
                .push_back(record);
        }

        let mut order: Vec<String> = by_region.keys().cloned().collect();
        order.sort();
        if !order.is_empty() {
            order.rotate_left(rotation_offset % order.len());
        }

        let mut sent_ids = Vec::new();
        let mut serviced_regions: std::collections::HashSet<String> = std::collections::HashSet::new();
        let budget = self.config.max_attempts_per_cycle;

        loop {
            if report.attempts as usize >= budget {
                break;
            }
            let mut any_dispatched = false;
            for region in &order {
                if report.attempts as usize >= budget {
                    break;
                }
                let queue = by_region.get_mut(region).unwrap();
                let Some(record) = queue.pop_front() else {
                    continue;
                };
                any_dispatched = true;
                serviced_regions.insert(region.clone());
                report.attempts += 1;

                let payload = self.message_builder.build_warning_message(&record.payload);
                let payload_json = serde_json::to_value(&payload).unwrap_or_default();

                if self.config.dry_run {
                    info!(event = "notification.dry_run", event_id = %record.event_id);
                    report.dry_run_skips += 1;
                    continue;
                }

                match self.notifier.send(&payload_json).await {
                    Ok(()) => {
                        sent_ids.push(record.event_id.clone());
                        report.sent += 1;
                        report.per_region.entry(region.clone()).or_default().sent += 1;
                    }
                    Err(NotifyError::NonRetriable(_) | NotifyError::RetriesExhausted(_)) => {
                        report.failures += 1;
                        report.per_region.entry(region.clone()).or_default().failed += 1;
                    }
                    Err(NotifyError::CircuitOpen) => {
                        report.failures += 1;
                    }
                }
            }
            if !any_dispatched {
                break;
            }
        }

        for (region, remaining) in by_region.iter() {
            if !remaining.is_empty() {
                warn!(
                    event = "notification.backpressure.applied",
                    region_code = region,
                    skipped = remaining.len(),
                );
                report.backpressure_skips += remaining.len() as u32;
            }
        }

        Ok((sent_ids, serviced_regions.len()))
    }
}
