//! Configuration loading and validation.
//!
//! Every option is read from the environment with the same
//! `env_or`/`env_or_parse`/`env_required` helper shape, then assembled
//! into one immutable [`Config`] and validated once at startup.

pub mod env;

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    File,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub api_allowed_hosts: Vec<String>,
    pub api_allowed_path_prefixes: Vec<String>,
    pub api_key: String,

    pub webhook_url: String,
    pub bot_name: String,
    pub report_base_url: String,

    pub region_codes: Vec<String>,
    pub region_names: HashMap<String, String>,

    pub lookback_days: u32,
    pub cycle_interval_sec: u64,
    pub area_interval_sec: u64,
    pub max_parallel_workers: usize,

    pub api_connect_timeout: Duration,
    pub api_read_timeout: Duration,
    pub webhook_connect_timeout: Duration,
    pub webhook_read_timeout: Duration,

    pub api_retry_count: u32,
    pub api_retry_base_delay: Duration,
    pub webhook_retry_count: u32,
    pub webhook_retry_base_delay: Duration,

    pub api_rate_limit_rps: u32,
    pub webhook_rate_limit_rps: u32,

    pub circuit_consecutive_failures: u32,
    pub circuit_open_duration: Duration,
    pub circuit_enabled: bool,

    pub max_attempts_per_cycle: usize,

    pub cleanup_retention_days: u32,
    pub cleanup_include_unsent: bool,
    pub cleanup_enabled: bool,

    pub state_backend: StateBackend,
    pub state_file_path: String,
    pub state_sqlite_path: String,

    pub outage_window_sec: u64,
    pub outage_min_failed_cycles: u32,
    pub outage_consecutive_failures: u32,
    pub outage_fail_ratio_threshold: f64,
    pub recovery_window_sec: u64,
    pub recovery_max_fail_ratio: f64,
    pub recovery_consecutive_successes: u32,
    pub heartbeat_interval_sec: u64,
    pub backoff_max_sec: u64,

    pub backfill_window_days: u32,
    pub max_windows_per_cycle: u32,
    pub recovery_backfill_max_days: u32,

    pub health_state_path: String,
    pub shutdown_grace: Duration,

    pub dry_run: bool,
    pub run_once: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("webhook URL must use TLS: {0}")]
    WebhookNotTls(String),
    #[error("api key appears to be pre-encoded (contains '%'); supply the raw key")]
    ApiKeyPreEncoded,
    #[error("api base url host/path is not in the configured allowlist: {0}")]
    ApiHostNotAllowed(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        use env::{env_or, env_or_parse, env_required};

        let region_codes = env::env_list("WX_REGION_CODES", &["R1"]);
        let region_names = env::env_map("WX_REGION_NAMES");

        let config = Config {
            api_base_url: env_or(
                "WX_API_BASE_URL",
                "https://apihub.kma.go.kr/api/typ01/url/wrn_met_data.php",
            ),
            api_allowed_hosts: env::env_list("WX_API_ALLOWED_HOSTS", &["apihub.kma.go.kr"]),
            api_allowed_path_prefixes: env::env_list("WX_API_ALLOWED_PATH_PREFIXES", &["/api"]),
            api_key: env_required("WX_API_KEY")?,

            webhook_url: env_required("WX_WEBHOOK_URL")?,
            bot_name: env_or("WX_BOT_NAME", "WeatherAlertBot"),
            report_base_url: env_or(
                "WX_REPORT_BASE_URL",
                "https://apihub.kma.go.kr/api/typ01/url/wrn_met_data.php",
            ),

            region_codes,
            region_names,

            lookback_days: env_or_parse("WX_LOOKBACK_DAYS", 1),
            cycle_interval_sec: env_or_parse("WX_CYCLE_INTERVAL_SEC", 300),
            area_interval_sec: env_or_parse("WX_AREA_INTERVAL_SEC", 1),
            max_parallel_workers: env_or_parse("WX_MAX_PARALLEL_WORKERS", 1),

            api_connect_timeout: Duration::from_secs(env_or_parse(
                "WX_API_CONNECT_TIMEOUT_SEC",
                10,
            )),
            api_read_timeout: Duration::from_secs(env_or_parse("WX_API_READ_TIMEOUT_SEC", 30)),
            webhook_connect_timeout: Duration::from_secs(env_or_parse(
                "WX_WEBHOOK_CONNECT_TIMEOUT_SEC",
                10,
            )),
            webhook_read_timeout: Duration::from_secs(env_or_parse(
                "WX_WEBHOOK_READ_TIMEOUT_SEC",
                15,
            )),

            api_retry_count: env_or_parse("WX_API_RETRY_COUNT", 3),
            api_retry_base_delay: Duration::from_millis(env_or_parse(
                "WX_API_RETRY_BASE_DELAY_MS",
                500,
            )),
            webhook_retry_count: env_or_parse("WX_WEBHOOK_RETRY_COUNT", 3),
            webhook_retry_base_delay: Duration::from_millis(env_or_parse(
                "WX_WEBHOOK_RETRY_BASE_DELAY_MS",
                500,
            )),

            api_rate_limit_rps: env_or_parse("WX_API_RATE_LIMIT_RPS", 5),
            webhook_rate_limit_rps: env_or_parse("WX_WEBHOOK_RATE_LIMIT_RPS", 1),

            circuit_consecutive_failures: env_or_parse("WX_CIRCUIT_CONSECUTIVE_FAILURES", 5),
            circuit_open_duration: Duration::from_secs(env_or_parse(
                "WX_CIRCUIT_OPEN_DURATION_SEC",
                60,
            )),
            circuit_enabled: env_or_parse("WX_CIRCUIT_ENABLED", true),

            max_attempts_per_cycle: env_or_parse("WX_MAX_ATTEMPTS_PER_CYCLE", 50),

            cleanup_retention_days: env_or_parse("WX_CLEANUP_RETENTION_DAYS", 30),
            cleanup_include_unsent: env_or_parse("WX_CLEANUP_INCLUDE_UNSENT", false),
            cleanup_enabled: env_or_parse("WX_CLEANUP_ENABLED", true),

            state_backend: match env_or("WX_STATE_BACKEND", "file").as_str() {
                "sqlite" => StateBackend::Sqlite,
                _ => StateBackend::File,
            },
            state_file_path: env_or("WX_STATE_FILE_PATH", "data/sent_messages.json"),
            state_sqlite_path: env_or("WX_STATE_SQLITE_PATH", "data/state.sqlite3"),

            outage_window_sec: env_or_parse("WX_OUTAGE_WINDOW_SEC", 600),
            outage_min_failed_cycles: env_or_parse("WX_OUTAGE_MIN_FAILED_CYCLES", 6),
            outage_consecutive_failures: env_or_parse("WX_OUTAGE_CONSECUTIVE_FAILURES", 4),
            outage_fail_ratio_threshold: env_or_parse("WX_OUTAGE_FAIL_RATIO_THRESHOLD", 0.5),
            recovery_window_sec: env_or_parse("WX_RECOVERY_WINDOW_SEC", 600),
            recovery_max_fail_ratio: env_or_parse("WX_RECOVERY_MAX_FAIL_RATIO", 0.1),
            recovery_consecutive_successes: env_or_parse("WX_RECOVERY_CONSECUTIVE_SUCCESSES", 8),
            heartbeat_interval_sec: env_or_parse("WX_HEARTBEAT_INTERVAL_SEC", 1800),
            backoff_max_sec: env_or_parse("WX_BACKOFF_MAX_SEC", 3600),

            backfill_window_days: env_or_parse("WX_BACKFILL_WINDOW_DAYS", 1),
            max_windows_per_cycle: env_or_parse("WX_MAX_WINDOWS_PER_CYCLE", 1),
            recovery_backfill_max_days: env_or_parse("WX_RECOVERY_BACKFILL_MAX_DAYS", 7),

            health_state_path: env_or("WX_HEALTH_STATE_PATH", "data/health_state.json"),
            shutdown_grace: Duration::from_secs(env_or_parse("WX_SHUTDOWN_GRACE_SEC", 30)),

            dry_run: env_or_parse("DRY_RUN", false),
            run_once: env_or_parse("RUN_ONCE", false),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.contains('%') {
            return Err(ConfigError::ApiKeyPreEncoded);
        }

        let webhook = url::Url::parse(&self.webhook_url).map_err(|_| ConfigError::InvalidValue {
            key: "WX_WEBHOOK_URL".into(),
            value: self.webhook_url.clone(),
        })?;
        if webhook.scheme() != "https" {
            return Err(ConfigError::WebhookNotTls(self.webhook_url.clone()));
        }

        let api = url::Url::parse(&self.api_base_url).map_err(|_| ConfigError::InvalidValue {
            key: "WX_API_BASE_URL".into(),
            value: self.api_base_url.clone(),
        })?;
        let host = api.host_str().unwrap_or_default();
        if !self.api_allowed_hosts.iter().any(|h| h == host) {
            return Err(ConfigError::ApiHostNotAllowed(self.api_base_url.clone()));
        }
        if !self
            .api_allowed_path_prefixes
            .iter()
            .any(|p| api.path().starts_with(p.as_str()))
        {
            return Err(ConfigError::ApiHostNotAllowed(self.api_base_url.clone()));
        }
        if self.region_codes.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "WX_REGION_CODES".into(),
                value: String::new(),
            });
        }

        Ok(())
    }
}
