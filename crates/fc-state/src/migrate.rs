//! One-shot migration from the file backend to the SQLite backend,
//! preserving `first_seen_at`, `updated_at`, `last_sent_at`, and `sent`
//! exactly.

use crate::file_backend::FileStateStore;
use crate::sqlite_backend::SqliteStateStore;
use crate::{Result, StateStore};

pub struct MigrationReport {
    pub records_migrated: u64,
}

/// Keeps each batch's bound-parameter count comfortably under SQLite's
/// default `SQLITE_LIMIT_VARIABLE_NUMBER` of 999 (6 params/row).
const MIGRATE_BATCH_SIZE: usize = 150;

pub async fn migrate_file_to_sqlite(
    file_store: &FileStateStore,
    sqlite_store: &SqliteStateStore,
) -> Result<MigrationReport> {
    let records = file_store.list_all().await?;
    let mut migrated = 0u64;

    for chunk in records.chunks(MIGRATE_BATCH_SIZE) {
        if chunk.is_empty() {
            continue;
        }

        let mut values_clause = Vec::with_capacity(chunk.len());
        let mut bindings = Vec::with_capacity(chunk.len());
        for (i, record) in chunk.iter().enumerate() {
            let base = i * 6;
            values_clause.push(format!(
                "(${}, ${}, ${}, ${}, ${}, ${})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5,
                base + 6,
            ));
            bindings.push((
                record.event_id.clone(),
                serde_json::to_string(&record.payload)?,
                record.first_seen_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.last_sent_at.map(|t| t.to_rfc3339()),
                record.sent as i64,
            ));
        }

        let query = format!(
            r#"
            INSERT INTO tracked_events (event_id, payload, first_seen_at, updated_at, last_sent_at, sent)
            VALUES {}
            ON CONFLICT(event_id) DO UPDATE SET
                payload = excluded.payload,
                first_seen_at = excluded.first_seen_at,
                updated_at = excluded.updated_at,
                last_sent_at = excluded.last_sent_at,
                sent = excluded.sent
            "#,
            values_clause.join(", ")
        );

        let mut q = sqlx::query(&query);
        for (event_id, payload, first_seen_at, updated_at, last_sent_at, sent) in &bindings {
            q = q
                .bind(event_id)
                .bind(payload)
                .bind(first_seen_at)
                .bind(updated_at)
                .bind(last_sent_at)
                .bind(sent);
        }
        q.execute(&sqlite_store.pool).await?;
        migrated += chunk.len() as u64;
    }

    Ok(MigrationReport {
        records_migrated: migrated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn migration_preserves_sent_and_timestamps() {
        let dir = tempdir().unwrap();
        let file_store = FileStateStore::open(dir.path().join("state.json"));
        let event = sample_event("S1");
        file_store.upsert(&[event.clone()]).await.unwrap();
        let fp = event.fingerprint().to_string();
        let sent_at = Utc::now();
        file_store.mark_sent(&[fp], sent_at).await.unwrap();

        let sqlite_store = SqliteStateStore::connect(":memory:").await.unwrap();
        let report = migrate_file_to_sqlite(&file_store, &sqlite_store)
            .await
            .unwrap();
        assert_eq!(report.records_migrated, 1);

        let migrated = sqlite_store.list_all().await.unwrap();
        assert!(migrated[0].sent);
        assert!(migrated[0].last_sent_at.is_some());
    }
}
