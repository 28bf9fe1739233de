//! Persistence for [`HealthState`], reusing the same atomic-write and
//! corruption-recovery helper the state store's file backend uses.

use std::path::PathBuf;
use std::sync::Mutex;

use fc_common::atomic_file::{self, LoadOutcome};
use thiserror::Error;
use tracing::{error, warn};

use crate::state::HealthState;

#[derive(Debug, Error)]
pub enum HealthStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct HealthStore {
    path: PathBuf,
    state: Mutex<HealthState>,
}

impl HealthStore {
    pub fn open(path: impl Into<PathBuf>, base_interval_sec: u64) -> Self {
        let path = path.into();
        let state = match atomic_file::load_json_with_recovery::<HealthState>(&path) {
            LoadOutcome::Loaded(state) => state,
            LoadOutcome::Absent => HealthState::healthy(base_interval_sec),
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
                HealthState::healthy(base_interval_sec)
            }
            LoadOutcome::ReadError(e) => {
                error!(event = "state.read_failed", path = %path.display(), error = %e);
                HealthState::healthy(base_interval_sec)
            }
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn current(&self) -> HealthState {
        self.state.lock().unwrap().clone()
    }

    pub fn persist(&self, state: HealthState) -> Result<(), HealthStoreError> {
        let bytes = serde_json::to_vec_pretty(&state)?;
        atomic_file::write_atomic(&self.path, &bytes).map_err(|e| {
            error!(event = "state.persist_failed", error = %e);
            e
        })?;
        *self.state.lock().unwrap() = state;
        Ok(())
    }
}
