//! One-shot maintenance subcommands: cleanup, migration, and
//! cross-backend verification.

use chrono::Utc;
use fc_config::Config;
use fc_state::{migrate::migrate_file_to_sqlite, verify_integrity, FileStateStore, SqliteStateStore, StateStore};
use tracing::{error, info};

pub async fn cleanup_state(
    config: &Config,
    days: i64,
    include_unsent: bool,
    dry_run: bool,
    state_repository_type: &str,
) -> anyhow::Result<()> {
    let older_than = Utc::now() - chrono::Duration::days(days);

    let removed_result = match state_repository_type {
        "sqlite" => {
            let store = SqliteStateStore::connect(&config.state_sqlite_path).await?;
            run_cleanup(&store, older_than, include_unsent, dry_run).await
        }
        _ => {
            let store = FileStateStore::open(&config.state_file_path);
            run_cleanup(&store, older_than, include_unsent, dry_run).await
        }
    };

    match removed_result {
        Ok(removed) => {
            info!(event = "state.cleanup.complete", removed, dry_run);
            Ok(())
        }
        Err(err) => {
            error!(event = "state.cleanup.failed", error = %err);
            Err(err)
        }
    }
}

async fn run_cleanup(
    store: &dyn StateStore,
    older_than: chrono::DateTime<Utc>,
    include_unsent: bool,
    dry_run: bool,
) -> anyhow::Result<u64> {
    if dry_run {
        let all = store.list_all().await?;
        let would_remove = all
            .iter()
            .filter(|r| r.updated_at < older_than && (include_unsent || r.sent))
            .count();
        return Ok(would_remove as u64);
    }
    Ok(store.cleanup_stale(older_than, include_unsent).await?)
}

pub async fn migrate_state(json_state_file: &str, sqlite_state_file: &str) -> anyhow::Result<()> {
    let file_store = FileStateStore::open(json_state_file);
    let sqlite_store = SqliteStateStore::connect(sqlite_state_file).await?;

    match migrate_file_to_sqlite(&file_store, &sqlite_store).await {
        Ok(report) => {
            info!(event = "state.migration.complete", records_migrated = report.records_migrated);
            Ok(())
        }
        Err(err) => {
            error!(event = "state.migration.failed", error = %err);
            Err(err.into())
        }
    }
}

pub async fn verify_state(config: &Config, strict: bool) -> anyhow::Result<bool> {
    let file_store = FileStateStore::open(&config.state_file_path);
    let sqlite_store = SqliteStateStore::connect(&config.state_sqlite_path).await?;

    match verify_integrity(&file_store, &sqlite_store, strict).await {
        Ok(report) => {
            let clean = report.is_clean();
            if clean {
                info!(event = "state.verify.complete", clean);
            } else {
                error!(event = "state.verify.failed", errors = ?report.errors, warnings = ?report.warnings);
            }
            Ok(clean)
        }
        Err(err) => {
            error!(event = "state.verify.failed", error = %err);
            Err(err.into())
        }
    }
}
