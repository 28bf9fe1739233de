//! Single-document JSON file backend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fc_common::atomic_file::{self, LoadOutcome};
use fc_common::WarningEvent;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::record::TrackedRecord;
use crate::{Result, StateStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    sent_messages: HashMap<String, TrackedRecord>,
}

struct Inner {
    document: Document,
    pending_count: u64,
}

/// File-backed [`StateStore`]. All mutations go through an in-process
/// mutex and an atomic write-temp-then-rename, matching the corruption
/// recovery contract shared with [`crate::sqlite_backend::SqliteStateStore`].
pub struct FileStateStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileStateStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = match atomic_file::load_json_with_recovery::<Document>(&path) {
            LoadOutcome::Loaded(doc) => doc,
            LoadOutcome::Absent => Document::default(),
            LoadOutcome::Corrupt {
                backup_path,
                backup_failed,
            } => {
                if backup_failed {
                    error!(event = "state.backup_failed", path = %path.display());
                } else {
                    warn!(
                        event = "state.invalid_json",
                        path = %path.display(),
                        backup_path = ?backup_path,
                    );
                }
                Document::default()
            }
            LoadOutcome::ReadError(e) => {
                error!(event = "state.read_failed", path = %path.display(), error = %e);
                Document::default()
            }
        };
        let pending_count = document
            .sent_messages
            .values()
            .filter(|r| !r.sent)
            .count() as u64;
        Self {
            path,
            inner: Mutex::new(Inner {
                document,
                pending_count,
            }),
        }
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&inner.document)?;
        atomic_file::write_atomic(&self.path, &bytes).map_err(|e| {
            error!(event = "state.persist_failed", error = %e);
            e
        })?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn upsert(&self, events: &[WarningEvent]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        for event in events {
            let fingerprint = event.fingerprint().to_string();
            match inner.document.sent_messages.get_mut(&fingerprint) {
                Some(existing) => existing.merge_observation(event.clone(), now),
                None => {
                    inner.document.sent_messages.insert(
                        fingerprint.clone(),
                        TrackedRecord::new(fingerprint, event.clone(), now),
                    );
                    inner.pending_count += 1;
                }
            }
        }
        self.persist(&inner)
    }

    async fn list_pending(&self) -> Result<Vec<TrackedRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .document
            .sent_messages
            .values()
            .filter(|r| !r.sent)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<TrackedRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.document.sent_messages.values().cloned().collect())
    }

    async fn mark_sent(&self, event_ids: &[String], at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for id in event_ids {
            if let Some(record) = inner.document.sent_messages.get_mut(id) {
                if !record.sent {
                    record.sent = true;
                    record.last_sent_at = Some(at);
                    record.updated_at = at;
                    inner.pending_count = inner.pending_count.saturating_sub(1);
                }
            }
        }
        self.persist(&inner)
    }

    async fn cleanup_stale(&self, older_than: DateTime<Utc>, include_unsent: bool) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let stale_ids: Vec<String> = inner
            .document
            .sent_messages
            .iter()
            .filter(|(_, r)| r.updated_at < older_than && (include_unsent || r.sent))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale_ids {
            if let Some(record) = inner.document.sent_messages.remove(id) {
                if !record.sent {
                    inner.pending_count = inner.pending_count.saturating_sub(1);
                }
            }
        }
        self.persist(&inner)?;
        Ok(stale_ids.len() as u64)
    }

    async fn count_pending(&self) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.pending_count)
    }
}
