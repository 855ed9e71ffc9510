//! JSON snapshot persistence for memory stores.
//!
//! Layout: one `<role>.json` file per store. Writes go to a temp file in the
//! same directory and are renamed into place.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::MemoryBackendFailure;

use super::store::MemoryEntry;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    name: String,
    entries: Vec<MemoryEntry>,
}

fn persistence(context: &str, err: impl std::fmt::Display) -> MemoryBackendFailure {
    MemoryBackendFailure::Persistence(format!("{context}: {err}"))
}

/// Load entries from `path`. A missing file is an empty store.
pub(crate) fn load_entries(path: &Path) -> Result<Vec<MemoryEntry>, MemoryBackendFailure> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(persistence(&format!("read {}", path.display()), e)),
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes)
        .map_err(|e| persistence(&format!("parse {}", path.display()), e))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(persistence(
            &format!("load {}", path.display()),
            format!("unsupported snapshot version {}", snapshot.version),
        ));
    }
    Ok(snapshot.entries)
}

/// Atomically replace the snapshot at `path` with `entries`.
pub(crate) fn save_entries(
    path: &Path,
    name: &str,
    entries: &[MemoryEntry],
) -> Result<(), MemoryBackendFailure> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| persistence("create memory dir", e))?;

    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        name: name.to_string(),
        entries: entries.to_vec(),
    };
    let bytes = serde_json::to_vec(&snapshot).map_err(|e| persistence("serialize", e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| persistence("create temp file", e))?;
    tmp.write_all(&bytes)
        .map_err(|e| persistence("write temp file", e))?;
    tmp.persist(path)
        .map_err(|e| persistence(&format!("persist {}", path.display()), e.error))?;
    Ok(())
}
