//! Integrity comparison between the two backends.

use crate::record::TrackedRecord;
use crate::{Result, StateStore};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub file_row_count: usize,
    pub sqlite_row_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Compares row count and per-row fingerprint/sent/timestamps between
/// the two backends. In `strict` mode any mismatch (including drift
/// that would otherwise be a warning) is reported as an error.
pub async fn verify_integrity(
    file_store: &dyn StateStore,
    sqlite_store: &dyn StateStore,
    strict: bool,
) -> Result<IntegrityReport> {
    let file_rows = file_store.list_all().await?;
    let sqlite_rows = sqlite_store.list_all().await?;

    let mut report = IntegrityReport {
        file_row_count: file_rows.len(),
        sqlite_row_count: sqlite_rows.len(),
        ..Default::default()
    };

    if file_rows.len() != sqlite_rows.len() {
        report.errors.push(format!(
            "row count mismatch: file={} sqlite={}",
            file_rows.len(),
            sqlite_rows.len()
        ));
    }

    let sqlite_by_id: HashMap<&str, &TrackedRecord> = sqlite_rows
        .iter()
        .map(|r| (r.event_id.as_str(), r))
        .collect();

    for file_row in &file_rows {
        match sqlite_by_id.get(file_row.event_id.as_str()) {
            None => report
                .errors
                .push(format!("missing in sqlite: {}", file_row.event_id)),
            Some(sqlite_row) => {
                if file_row.sent != sqlite_row.sent {
                    report.errors.push(format!(
                        "sent mismatch for {}: file={} sqlite={}",
                        file_row.event_id, file_row.sent, sqlite_row.sent
                    ));
                }
                if file_row.first_seen_at != sqlite_row.first_seen_at
                    || file_row.last_sent_at != sqlite_row.last_sent_at
                {
                    let bucket = if strict {
                        &mut report.errors
                    } else {
                        &mut report.warnings
                    };
                    bucket.push(format!("timestamp drift for {}", file_row.event_id));
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileStateStore, SqliteStateStore};
    use chrono::Utc;
    use fc_common::event::ActionCode;
    use fc_common::WarningEvent;
    use tempfile::tempdir;

    fn sample_event(station: &str) -> WarningEvent {
        WarningEvent {
            region_code: "R1".into(),
            region_name: "Region One".into(),
            kind_code: "K1".into(),
            level_code: "L1".into(),
            action_code: ActionCode::Announce,
            cancel_flag: false,
            start_time: None,
            end_time: None,
            announce_time: Some(Utc::now()),
            station_id: Some(station.into()),
            announce_seq: Some(1),
            report_url: None,
        }
    }

    #[tokio::test]
    async fn matching_backends_report_clean() {
        let dir = tempdir().unwrap();
        let file_store = FileStateStore::open(dir.path().join("state.json"));
        let event = sample_event("S1");
        file_store.upsert(&[event]).await.unwrap();

        let sqlite_store = SqliteStateStore::connect(":memory:").await.unwrap();
        crate::migrate::migrate_file_to_sqlite(&file_store, &sqlite_store)
            .await
            .unwrap();

        let report = verify_integrity(&file_store, &sqlite_store, false)
            .await
            .unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn divergent_backends_report_errors() {
        let dir = tempdir().unwrap();
        let file_store = FileStateStore::open(dir.path().join("state.json"));
        file_store.upsert(&[sample_event("S1")]).await.unwrap();

        let sqlite_store = SqliteStateStore::connect(":memory:").await.unwrap();
        // Intentionally not migrated: row counts diverge.

        let report = verify_integrity(&file_store, &sqlite_store, false)
            .await
            .unwrap();
        assert!(!report.errors.is_empty());
    }
}
