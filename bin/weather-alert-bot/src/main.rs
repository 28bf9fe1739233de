//! Weather Alert Bot
//!
//! Polls a government weather-warning API, deduplicates warning events
//! against a durable state store, pushes new events to a Dooray-style
//! webhook, and tracks upstream health with outage/recovery/backfill
//! logic.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `WX_API_BASE_URL` | KMA warning endpoint | Upstream weather API base URL |
//! | `WX_API_KEY` | - | Upstream API key (required, must not be pre-encoded) |
//! | `WX_WEBHOOK_URL` | - | Webhook URL (required, must be `https`) |
//! | `WX_REGION_CODES` | `R1` | Comma-separated region codes to poll |
//! | `WX_CYCLE_INTERVAL_SEC` | `300` | Base interval between cycles |
//! | `WX_STATE_BACKEND` | `file` | `file` or `sqlite` |
//! | `DRY_RUN` | `false` | Render payloads without sending |
//! | `RUN_ONCE` | `false` | Run a single cycle then exit |
//! | `RUST_LOG` | `info` | Log level |

mod cli;
mod commands;

use std::sync::Arc;

use clap::Parser;
use fc_common::clock::SystemClock;
use fc_common::{Clock, RateLimiter};
use fc_config::{Config, StateBackend};
use fc_health::{HealthStore, HealthThresholds};
use fc_message::MessageBuilder;
use fc_notify::{NotifierConfig, WebhookNotifier};
use fc_orchestrator::{CycleOrchestrator, CycleOrchestratorConfig, ServiceLoop, ServiceLoopConfig, StopReason};
use fc_state::{FileStateStore, SqliteStateStore, StateStore};
use fc_weather::{ReqwestWeatherClient, WeatherClient, WeatherClientConfig};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_INVALID_CONFIG: i32 = 2;

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let code = runtime.block_on(run());
    std::process::ExitCode::from(code as u8)
}

async fn run() -> i32 {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(event = "startup.invalid_config", error = %err);
            return EXIT_INVALID_CONFIG;
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_service(config).await,
        Command::CleanupState {
            days,
            include_unsent,
            dry_run,
            state_repository_type,
        } => {
            match commands::cleanup_state(&config, days, include_unsent, dry_run, &state_repository_type).await {
                Ok(()) => EXIT_SUCCESS,
                Err(_) => EXIT_RUNTIME_FAILURE,
            }
        }
        Command::MigrateState {
            json_state_file,
            sqlite_state_file,
        } => match commands::migrate_state(&json_state_file, &sqlite_state_file).await {
            Ok(()) => EXIT_SUCCESS,
            Err(_) => EXIT_RUNTIME_FAILURE,
        },
        Command::VerifyState { strict } => match commands::verify_state(&config, strict).await {
            Ok(true) => EXIT_SUCCESS,
            Ok(false) => {
                if strict {
                    EXIT_RUNTIME_FAILURE
                } else {
                    EXIT_SUCCESS
                }
            }
            Err(_) => EXIT_RUNTIME_FAILURE,
        },
    }
}

async fn run_service(config: Config) -> i32 {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cancel = Arc::new(tokio::sync::Notify::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let state_store: Arc<dyn StateStore> = match build_state_store(&config).await {
        Ok(store) => store,
        Err(err) => {
            error!(event = "startup.invalid_config", error = %err);
            return EXIT_INVALID_CONFIG;
        }
    };

    let weather_clients = match build_weather_clients(&config, clock.clone(), cancel.clone()) {
        Ok(clients) => clients,
        Err(err) => {
            error!(event = "startup.invalid_config", error = %err);
            return EXIT_INVALID_CONFIG;
        }
    };

    let notifier = match build_notifier(&config, clock.clone(), cancel.clone()) {
        Ok(notifier) => notifier,
        Err(err) => {
            error!(event = "startup.invalid_config", error = %err);
            return EXIT_INVALID_CONFIG;
        }
    };

    let message_builder = Arc::new(MessageBuilder::new(
        config.bot_name.clone(),
        config.report_base_url.clone(),
    ));

    let health_store = HealthStore::open(&config.health_state_path, config.cycle_interval_sec);
    let thresholds = health_thresholds(&config);

    let orchestrator_config = CycleOrchestratorConfig {
        region_codes: config.region_codes.clone(),
        area_interval_sec: config.area_interval_sec,
        max_parallel_workers: config.max_parallel_workers,
        max_attempts_per_cycle: config.max_attempts_per_cycle,
        dry_run: config.dry_run,
    };
    let orchestrator = CycleOrchestrator::new(
        orchestrator_config,
        weather_clients,
        state_store.clone(),
        notifier.clone(),
        message_builder.clone(),
        cancel.clone(),
    );

    let loop_config = ServiceLoopConfig {
        region_codes: config.region_codes.clone(),
        lookback_days: config.lookback_days as i64,
        run_once: config.run_once,
        shutdown_grace: config.shutdown_grace,
        cleanup_enabled: config.cleanup_enabled,
        cleanup_retention_days: config.cleanup_retention_days as i64,
        cleanup_include_unsent: config.cleanup_include_unsent,
        thresholds,
    };
    let mut service_loop = ServiceLoop::new(
        loop_config,
        orchestrator,
        health_store,
        state_store,
        notifier,
        message_builder,
        clock,
        cancel.clone(),
        shutdown_rx,
    );

    info!(event = "startup.ready", regions = config.region_codes.len());

    let shutdown_grace = config.shutdown_grace;
    let loop_handle = tokio::spawn(async move { service_loop.run().await });

    let shutdown_watcher = tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
        cancel.notify_waiters();
    });

    let exit_code = wait_for_loop(loop_handle, shutdown_grace).await;
    shutdown_watcher.abort();
    exit_code
}

async fn wait_for_loop(handle: tokio::task::JoinHandle<StopReason>, grace: std::time::Duration) -> i32 {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(StopReason::RunOnceComplete | StopReason::ShutdownSignal)) => EXIT_SUCCESS,
        Ok(Ok(StopReason::Fatal(reason))) => {
            error!(event = "cycle.fatal_error", reason);
            EXIT_RUNTIME_FAILURE
        }
        Ok(Err(join_err)) => {
            error!(event = "shutdown.unexpected_error", error = %join_err);
            EXIT_RUNTIME_FAILURE
        }
        Err(_) => {
            error!(event = "shutdown.forced");
            EXIT_RUNTIME_FAILURE
        }
    }
}

async fn build_state_store(config: &Config) -> anyhow::Result<Arc<dyn StateStore>> {
    Ok(match config.state_backend {
        StateBackend::File => Arc::new(FileStateStore::open(&config.state_file_path)),
        StateBackend::Sqlite => Arc::new(SqliteStateStore::connect(&config.state_sqlite_path).await?),
    })
}

fn build_weather_clients(
    config: &Config,
    clock: Arc<dyn Clock>,
    cancel: Arc<tokio::sync::Notify>,
) -> anyhow::Result<Vec<Arc<dyn WeatherClient>>> {
    let rate_limiter = Arc::new(RateLimiter::new(config.api_rate_limit_rps));
    let worker_count = config.max_parallel_workers.max(1);
    let mut clients = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let client_config = WeatherClientConfig {
            base_url: config.api_base_url.clone(),
            api_key: config.api_key.clone(),
            page_size: 100,
            connect_timeout: config.api_connect_timeout,
            read_timeout: config.api_read_timeout,
            retry_count: config.api_retry_count,
            retry_base_delay: config.api_retry_base_delay,
            region_names: config.region_names.clone(),
        };
        let client = ReqwestWeatherClient::new(
            client_config,
            rate_limiter.clone(),
            clock.clone(),
            cancel.clone(),
        )?;
        clients.push(Arc::new(client) as Arc<dyn WeatherClient>);
    }
    Ok(clients)
}

fn build_notifier(
    config: &Config,
    clock: Arc<dyn Clock>,
    cancel: Arc<tokio::sync::Notify>,
) -> anyhow::Result<Arc<dyn fc_notify::Notifier>> {
    let notifier_config = NotifierConfig {
        webhook_url: config.webhook_url.clone(),
        connect_timeout: config.webhook_connect_timeout,
        read_timeout: config.webhook_read_timeout,
        retry_count: config.webhook_retry_count,
        retry_base_delay: config.webhook_retry_base_delay,
        raw_api_key: Some(config.api_key.clone()),
    };
    let rate_limiter = Arc::new(RateLimiter::new(config.webhook_rate_limit_rps));
    let notifier = WebhookNotifier::new(
        notifier_config,
        rate_limiter,
        config.circuit_enabled,
        config.circuit_consecutive_failures,
        config.circuit_open_duration,
        clock,
        cancel,
    )?;
    Ok(Arc::new(notifier))
}

fn health_thresholds(config: &Config) -> HealthThresholds {
    HealthThresholds {
        base_interval_sec: config.cycle_interval_sec,
        outage_window_sec: config.outage_window_sec as i64,
        outage_min_failed_cycles: config.outage_min_failed_cycles,
        outage_consecutive_failures: config.outage_consecutive_failures,
        outage_fail_ratio_threshold: config.outage_fail_ratio_threshold,
        recovery_window_sec: config.recovery_window_sec as i64,
        recovery_max_fail_ratio: config.recovery_max_fail_ratio,
        recovery_consecutive_successes: config.recovery_consecutive_successes,
        heartbeat_interval_sec: config.heartbeat_interval_sec as i64,
        backoff_max_sec: config.backoff_max_sec,
        backfill_window_days: config.backfill_window_days,
        max_windows_per_cycle: config.max_windows_per_cycle,
        recovery_backfill_max_days: config.recovery_backfill_max_days,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(event = "shutdown.interrupt");
}
