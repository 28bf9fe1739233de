//! Embedded SQLite backend, following the repository-per-backend shape
//! used elsewhere in this workspace, batched through a single prepared
//! statement per write so payload-unchanged upserts are a no-op.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fc_common::WarningEvent;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

use crate::record::TrackedRecord;
use crate::{Result, StateStore};

pub struct SqliteStateStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn connect(path: &str) -> Result<Self> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_events (
                event_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_sent_at TEXT,
                sent INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_tracked_events_sent ON tracked_events(sent);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<TrackedRecord> {
        let payload: String = row.get("payload");
        let last_sent_at: Option<String> = row.get("last_sent_at");
        Ok(TrackedRecord {
            event_id: row.get("event_id"),
            payload: serde_json::from_str(&payload)?,
            first_seen_at: parse_ts(row.get("first_seen_at")),
            updated_at: parse_ts(row.get("updated_at")),
            last_sent_at: last_sent_at.map(|s| parse_ts(&s)),
            sent: row.get::<i64, _>("sent") != 0,
        })
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn upsert(&self, events: &[WarningEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();

        let mut rows = Vec::with_capacity(events.len());
        let mut values_clause = Vec::with_capacity(events.len());
        for (i, event) in events.iter().enumerate() {
            let fingerprint = event.fingerprint().to_string();
            let payload = serde_json::to_string(event)?;
            let base = i * 3;
            values_clause.push(format!(
                "(${}, ${}, ${}, ${}, NULL, 0)",
                base + 1,
                base + 2,
                base + 3,
                base + 3,
            ));
            rows.push((fingerprint, payload));
        }

        let query = format!(
            r#"
            INSERT INTO tracked_events (event_id, payload, first_seen_at, updated_at, last_sent_at, sent)
            VALUES {}
            ON CONFLICT(event_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            WHERE tracked_events.payload IS NOT excluded.payload
            "#,
            values_clause.join(", ")
        );

        let mut q = sqlx::query(&query);
        for (fingerprint, payload) in &rows {
            q = q.bind(fingerprint).bind(payload).bind(&now);
        }
        q.execute(&self.pool).await?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<TrackedRecord>> {
        let rows = sqlx::query("SELECT * FROM tracked_events WHERE sent = 0")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_all(&self) -> Result<Vec<TrackedRecord>> {
        let rows = sqlx::query("SELECT * FROM tracked_events")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn mark_sent(&self, event_ids: &[String], at: DateTime<Utc>) -> Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        let placeholders: Vec<String> = (1..=event_ids.len()).map(|i| format!("${}", i + 1)).collect();
        let query = format!(
            "UPDATE tracked_events SET sent = 1, last_sent_at = $1, updated_at = $1 WHERE sent = 0 AND event_id IN ({})",
            placeholders.join(", ")
        );
        let mut q = sqlx::query(&query).bind(at.to_rfc3339());
        for id in event_ids {
            q = q.bind(id);
        }
        q.execute(&self.pool).await?;
        Ok(())
    }

    async fn cleanup_stale(&self, older_than: DateTime<Utc>, include_unsent: bool) -> Result<u64> {
        let query = if include_unsent {
            "DELETE FROM tracked_events WHERE updated_at < $1"
        } else {
            "DELETE FROM tracked_events WHERE updated_at < $1 AND sent = 1"
        };
        let result = sqlx::query(query)
            .bind(older_than.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_pending(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM tracked_events WHERE sent = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("c") as u64)
    }
}
