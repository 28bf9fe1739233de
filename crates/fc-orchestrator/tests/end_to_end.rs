//! End-to-end scenarios against in-memory fakes: a fresh bridge seeing
//! its first warnings, re-seeing the same warning without re-sending
//! it, backpressure under a tight per-cycle attempt budget, and a
//! fully-failing region tripping health's outage detection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fc_common::event::ActionCode;
use fc_common::WarningEvent;
use fc_message::MessageBuilder;
use fc_notify::{NotifyError, Notifier};
use fc_orchestrator::{CycleOrchestrator, CycleOrchestratorConfig};
use fc_state::{StateStore, TrackedRecord};
use fc_weather::{WeatherClient, WeatherError};

fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn sample_event(region: &str, seq: u32) -> WarningEvent {
    WarningEvent {
        region_code: region.to_string(),
        region_name: format!("Region {region}"),
        kind_code: "RAIN".to_string(),
        level_code: "WARNING".to_string(),
        action_code: ActionCode::Announce,
        cancel_flag: false,
        start_time: Some(ts(2026, 7, 1, 0)),
        end_time: None,
        announce_time: Some(ts(2026, 7, 1, 0)),
        station_id: Some(format!("ST-{region}")),
        announce_seq: Some(seq),
        report_url: None,
    }
}

/// A fixed script of events per region per call; later calls for the
/// same region repeat the last scripted response, modeling a stable
/// upstream rather than running out of data.
struct ScriptedWeatherClient {
    scripts: Mutex<HashMap<String, Vec<Result<Vec<WarningEvent>, WeatherError>>>>,
    calls: AtomicU32,
}

impl ScriptedWeatherClient {
    fn new(scripts: HashMap<String, Vec<Result<Vec<WarningEvent>, WeatherError>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl WeatherClient for ScriptedWeatherClient {
    async fn fetch(
        &self,
        region_code: &str,
        _from_date: DateTime<Utc>,
        _to_date: DateTime<Utc>,
    ) -> Result<Vec<WarningEvent>, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(region_code) else {
            return Ok(Vec::new());
        };
        if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue[0].clone()
        }
    }
}

/// Minimal in-process mirror of [`FileStateStore`]'s contract, enough
/// to drive the dedup and dispatch phases without touching disk.
#[derive(Default)]
struct InMemoryStateStore {
    records: Mutex<HashMap<String, TrackedRecord>>,
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn upsert(&self, events: &[WarningEvent]) -> fc_state::Result<()> {
        let mut records = self.records.lock().unwrap();
        let now = Utc::now();
        for event in events {
            let key = event.fingerprint().to_string();
            match records.get_mut(&key) {
                Some(existing) => existing.merge_observation(event.clone(), now),
                None => {
                    records.insert(key.clone(), TrackedRecord::new(key, event.clone(), now));
                }
            }
        }
        Ok(())
    }

    async fn list_pending(&self) -> fc_state::Result<Vec<TrackedRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| !r.sent)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> fc_state::Result<Vec<TrackedRecord>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn mark_sent(&self, event_ids: &[String], at: DateTime<Utc>) -> fc_state::Result<()> {
        let mut records = self.records.lock().unwrap();
        for id in event_ids {
            if let Some(record) = records.get_mut(id) {
                record.sent = true;
                record.last_sent_at = Some(at);
            }
        }
        Ok(())
    }

    async fn cleanup_stale(
        &self,
        older_than: DateTime<Utc>,
        include_unsent: bool,
    ) -> fc_state::Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| r.updated_at >= older_than || (!include_unsent && !r.sent));
        Ok((before - records.len()) as u64)
    }

    async fn count_pending(&self) -> fc_state::Result<u64> {
        Ok(self.records.lock().unwrap().values().filter(|r| !r.sent).count() as u64)
    }
}

/// Records every payload handed to it; can be configured to fail every
/// send for a given region so the cycle's failure accounting can be
/// exercised without a live server.
struct RecordingNotifier {
    sent: Mutex<Vec<serde_json::Value>>,
    fail_always: bool,
}

impl RecordingNotifier {
    fn new(fail_always: bool) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_always,
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, payload: &serde_json::Value) -> Result<(), NotifyError> {
        if self.fail_always {
            return Err(NotifyError::RetriesExhausted("forced failure".to_string()));
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

fn orchestrator(
    regions: Vec<&str>,
    client: Arc<dyn WeatherClient>,
    state: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    max_attempts_per_cycle: usize,
) -> CycleOrchestrator {
    let config = CycleOrchestratorConfig {
        region_codes: regions.into_iter().map(str::to_string).collect(),
        area_interval_sec: 0,
        max_parallel_workers: 1,
        max_attempts_per_cycle,
        dry_run: false,
    };
    let message_builder = Arc::new(MessageBuilder::new("WeatherBot", "https://example.test/report"));
    CycleOrchestrator::new(
        config,
        vec![client],
        state,
        notifier,
        message_builder,
        Arc::new(tokio::sync::Notify::new()),
    )
}

#[tokio::test]
async fn first_sighting_of_a_warning_is_sent_exactly_once() {
    let mut scripts = HashMap::new();
    scripts.insert("108".to_string(), vec![Ok(vec![sample_event("108", 1)])]);
    let client: Arc<dyn WeatherClient> = Arc::new(ScriptedWeatherClient::new(scripts));
    let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
    let notifier = Arc::new(RecordingNotifier::new(false));

    let orch = orchestrator(
        vec!["108"],
        client,
        state.clone(),
        notifier.clone() as Arc<dyn Notifier>,
        10,
    );

    let (report, _) = orch
        .run_cycle(ts(2026, 7, 1, 0), ts(2026, 7, 2, 0), 0)
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    assert_eq!(state.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn re_seeing_the_same_warning_does_not_resend_it() {
    let event = sample_event("108", 1);
    let mut scripts = HashMap::new();
    scripts.insert("108".to_string(), vec![Ok(vec![event.clone()])]);
    let client: Arc<dyn WeatherClient> = Arc::new(ScriptedWeatherClient::new(scripts));
    let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
    let notifier = Arc::new(RecordingNotifier::new(false));

    let orch = orchestrator(
        vec!["108"],
        client,
        state.clone(),
        notifier.clone() as Arc<dyn Notifier>,
        10,
    );

    orch.run_cycle(ts(2026, 7, 1, 0), ts(2026, 7, 2, 0), 0)
        .await
        .unwrap();
    let (second, _) = orch
        .run_cycle(ts(2026, 7, 1, 1), ts(2026, 7, 2, 0), 0)
        .await
        .unwrap();

    assert_eq!(second.sent, 0);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn tight_attempt_budget_applies_backpressure_across_regions() {
    let mut scripts = HashMap::new();
    scripts.insert(
        "A".to_string(),
        vec![Ok(vec![sample_event("A", 1), sample_event("A", 2)])],
    );
    scripts.insert(
        "B".to_string(),
        vec![Ok(vec![sample_event("B", 1), sample_event("B", 2)])],
    );
    let client: Arc<dyn WeatherClient> = Arc::new(ScriptedWeatherClient::new(scripts));
    let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
    let notifier = Arc::new(RecordingNotifier::new(false));

    let orch = orchestrator(
        vec!["A", "B"],
        client,
        state.clone(),
        notifier.clone() as Arc<dyn Notifier>,
        2,
    );

    let (report, _) = orch
        .run_cycle(ts(2026, 7, 1, 0), ts(2026, 7, 2, 0), 0)
        .await
        .unwrap();

    assert_eq!(report.attempts, 2);
    assert_eq!(report.sent, 2);
    assert_eq!(report.backpressure_skips, 2);
    assert_eq!(state.count_pending().await.unwrap(), 2);
}

#[tokio::test]
async fn rotation_covers_every_region_within_ceil_n_over_b_cycles() {
    // 4 regions, each with more pending events than a single cycle can
    // drain, and a budget of 2 attempts/cycle: every region must be
    // attempted at least once within ceil(4/2) = 2 cycles, with no gaps
    // from a stale fixed-offset rotation.
    let regions = ["A", "B", "C", "D"];
    let mut scripts = HashMap::new();
    for region in regions {
        scripts.insert(
            region.to_string(),
            vec![Ok((1..=5).map(|seq| sample_event(region, seq)).collect())],
        );
    }
    let client: Arc<dyn WeatherClient> = Arc::new(ScriptedWeatherClient::new(scripts));
    let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
    let notifier = Arc::new(RecordingNotifier::new(false));

    let orch = orchestrator(
        regions.to_vec(),
        client,
        state.clone(),
        notifier.clone() as Arc<dyn Notifier>,
        2,
    );

    let mut touched: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut offset = 0;
    for _ in 0..2 {
        let (report, next_offset) = orch
            .run_cycle(ts(2026, 7, 1, 0), ts(2026, 7, 2, 0), offset)
            .await
            .unwrap();
        for (region, stats) in &report.per_region {
            if stats.sent > 0 {
                touched.insert(region.clone());
            }
        }
        offset = next_offset;
    }

    for region in regions {
        assert!(touched.contains(region), "region {region} was never attempted within the fairness window");
    }
}

#[tokio::test]
async fn every_region_failing_surfaces_a_full_cycle_failure_ratio() {
    let mut scripts = HashMap::new();
    scripts.insert("A".to_string(), vec![Err(WeatherError::Http(503))]);
    scripts.insert("B".to_string(), vec![Err(WeatherError::Timeout)]);
    let client: Arc<dyn WeatherClient> = Arc::new(ScriptedWeatherClient::new(scripts));
    let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
    let notifier = Arc::new(RecordingNotifier::new(false));

    let orch = orchestrator(
        vec!["A", "B"],
        client,
        state,
        notifier as Arc<dyn Notifier>,
        10,
    );

    let (report, _) = orch
        .run_cycle(ts(2026, 7, 1, 0), ts(2026, 7, 2, 0), 0)
        .await
        .unwrap();

    assert_eq!(report.area_failure_count, 2);
    assert_eq!(report.area_total_count, 2);
    let outcome = fc_health::CycleOutcome::from_area_counts(
        ts(2026, 7, 1, 0),
        report.area_failure_count,
        report.area_total_count,
        0.5,
        report.error_code_histogram.keys().cloned().collect(),
    );
    assert!(outcome.severe_failure);
}

#[tokio::test]
async fn webhook_failures_are_counted_without_blocking_other_regions() {
    let mut scripts = HashMap::new();
    scripts.insert("A".to_string(), vec![Ok(vec![sample_event("A", 1)])]);
    scripts.insert("B".to_string(), vec![Ok(vec![sample_event("B", 1)])]);
    let client: Arc<dyn WeatherClient> = Arc::new(ScriptedWeatherClient::new(scripts));
    let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
    let notifier = Arc::new(RecordingNotifier::new(true));

    let orch = orchestrator(
        vec!["A", "B"],
        client,
        state.clone(),
        notifier as Arc<dyn Notifier>,
        10,
    );

    let (report, _) = orch
        .run_cycle(ts(2026, 7, 1, 0), ts(2026, 7, 2, 0), 0)
        .await
        .unwrap();

    assert_eq!(report.failures, 2);
    assert_eq!(report.sent, 0);
    assert_eq!(state.count_pending().await.unwrap(), 2);
}

#[tokio::test]
async fn dry_run_renders_payloads_without_sending_or_marking_sent() {
    let mut scripts = HashMap::new();
    scripts.insert("108".to_string(), vec![Ok(vec![sample_event("108", 1)])]);
    let client: Arc<dyn WeatherClient> = Arc::new(ScriptedWeatherClient::new(scripts));
    let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
    let notifier = Arc::new(RecordingNotifier::new(false));

    let config = CycleOrchestratorConfig {
        region_codes: vec!["108".to_string()],
        area_interval_sec: 0,
        max_parallel_workers: 1,
        max_attempts_per_cycle: 10,
        dry_run: true,
    };
    let message_builder = Arc::new(MessageBuilder::new("WeatherBot", "https://example.test/report"));
    let orch = CycleOrchestrator::new(
        config,
        vec![client],
        state.clone(),
        notifier.clone() as Arc<dyn Notifier>,
        message_builder,
        Arc::new(tokio::sync::Notify::new()),
    );

    let (report, _) = orch
        .run_cycle(ts(2026, 7, 1, 0), ts(2026, 7, 2, 0), 0)
        .await
        .unwrap();

    assert_eq!(report.dry_run_skips, 1);
    assert_eq!(notifier.sent.lock().unwrap().len(), 0);
    assert_eq!(state.count_pending().await.unwrap(), 1);
}
