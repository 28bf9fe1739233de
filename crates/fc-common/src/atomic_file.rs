//! Write-temp-then-rename helper shared by the state store's file backend
//! and the health store, plus the corruption-recovery dance: a persisted
//! artifact that fails to parse is renamed aside rather than treated as
//! fatal.

use chrono::Utc;
use std::path::{Path, PathBuf};

/// Atomically replaces `path` with `contents`: writes to a temp file in
/// the same directory, then renames over the live path so a crash never
/// leaves a half-written artifact behind.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, contents)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Outcome of attempting to load a possibly-corrupted JSON artifact.
pub enum LoadOutcome<T> {
    /// File did not exist; caller should start from an empty state.
    Absent,
    /// Parsed successfully.
    Loaded(T),
    /// Parse failed; the broken file was renamed aside (or, if the
    /// rename itself failed, `backup_failed` is `true`).
    Corrupt {
        backup_path: Option<PathBuf>,
        backup_failed: bool,
    },
    /// The file exists but couldn't be read (permissions, disk error, ...).
    /// Distinct from `Absent` so callers don't mistake a read failure for
    /// a fresh start.
    ReadError(std::io::Error),
}

/// Reads and parses a JSON artifact at `path`, applying the
/// corruption-recovery contract: on parse failure, renames the file to
/// `<path>.broken-<utc_timestamp>` and reports the outcome instead of
/// returning an error, so callers can continue with an empty state.
pub fn load_json_with_recovery<T: serde::de::DeserializeOwned>(path: &Path) -> LoadOutcome<T> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadOutcome::Absent,
        Err(e) => return LoadOutcome::ReadError(e),
    };

    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => LoadOutcome::Loaded(value),
        Err(_) => {
            let backup_path = broken_sibling_path(path);
            match std::fs::rename(path, &backup_path) {
                Ok(()) => LoadOutcome::Corrupt {
                    backup_path: Some(backup_path),
                    backup_failed: false,
                },
                Err(_) => LoadOutcome::Corrupt {
                    backup_path: None,
                    backup_failed: true,
                },
            }
        }
    }
}

fn broken_sibling_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{file_name}.broken-{stamp}"))
}
