// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server presence records.
//!
//! A [`ServerRecord`] says which process owns the discovery server of a
//! domain. `is_running` answers from here instead of probing the network,
//! and `stop` clears the record once the server is gone.

use crate::records::GuidPrefix;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Discovery server ownership record for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub domain_id: u32,
    /// Process that created the server participant.
    pub pid: u32,
    pub guid_prefix: GuidPrefix,
    /// Unix time in milliseconds.
    pub started_at_ms: u64,
}

impl ServerRecord {
    /// Record owned by the calling process, stamped now.
    pub fn for_current_process(domain_id: u32, guid_prefix: GuidPrefix) -> Self {
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            domain_id,
            pid: std::process::id(),
            guid_prefix,
            started_at_ms,
        }
    }

    /// Whether the owning process still exists.
    pub fn is_live(&self) -> bool {
        pid_alive(self.pid)
    }
}

/// Check whether a process exists.
///
/// `EPERM` means the process exists but belongs to someone else.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs the existence and permission check only.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    // No cheap check available; assume alive.
    true
}

/// Where server records live.
pub trait ServerStateStore: Send + Sync {
    fn load(&self, domain_id: u32) -> Result<Option<ServerRecord>, StateError>;

    fn save(&self, record: &ServerRecord) -> Result<(), StateError>;

    /// Remove the record of `domain_id`. Missing records are not an error.
    fn clear(&self, domain_id: u32) -> Result<(), StateError>;
}

// ============================================================================
// File store
// ============================================================================

/// One JSON file per domain under a state directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, domain_id: u32) -> PathBuf {
        self.dir.join(format!("domain-{}.json", domain_id))
    }
}

impl ServerStateStore for FileStateStore {
    fn load(&self, domain_id: u32) -> Result<Option<ServerRecord>, StateError> {
        let path = self.path_for(domain_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::Io(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let record = serde_json::from_str(&content)
            .map_err(|e| StateError::Parse(format!("{}: {}", path.display(), e)))?;
        Ok(Some(record))
    }

    fn save(&self, record: &ServerRecord) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            StateError::Io(format!(
                "Failed to create directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::Serialize(e.to_string()))?;

        // Atomic write: temp file, then rename over the target.
        let path = self.path_for(record.domain_id);
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, json).map_err(|e| {
            StateError::Io(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        std::fs::rename(&temp_path, &path).map_err(|e| {
            StateError::Io(format!("Failed to rename {}: {}", temp_path.display(), e))
        })?;
        Ok(())
    }

    fn clear(&self, domain_id: u32) -> Result<(), StateError> {
        let path = self.path_for(domain_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::Io(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// Records shared between contexts of one process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<u32, ServerRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServerStateStore for MemoryStateStore {
    fn load(&self, domain_id: u32) -> Result<Option<ServerRecord>, StateError> {
        Ok(self.records.lock().get(&domain_id).cloned())
    }

    fn save(&self, record: &ServerRecord) -> Result<(), StateError> {
        self.records
            .lock()
            .insert(record.domain_id, record.clone());
        Ok(())
    }

    fn clear(&self, domain_id: u32) -> Result<(), StateError> {
        self.records.lock().remove(&domain_id);
        Ok(())
    }
}

/// State store error types.
#[derive(Debug, Clone)]
pub enum StateError {
    Io(String),
    Parse(String),
    Serialize(String),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {}", s),
            Self::Parse(s) => write!(f, "Parse error: {}", s),
            Self::Serialize(s) => write!(f, "Serialize error: {}", s),
        }
    }
}

impl std::error::Error for StateError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::GuidPrefix;

    fn record(domain_id: u32, pid: u32) -> ServerRecord {
        ServerRecord {
            domain_id,
            pid,
            guid_prefix: GuidPrefix::new([0x44; 12]),
            started_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        assert!(store.load(3).unwrap().is_none());
        store.save(&record(3, 1234)).unwrap();
        assert_eq!(store.load(3).unwrap(), Some(record(3, 1234)));
        assert!(store.path_for(3).ends_with("domain-3.json"));
        // No temp file left behind.
        assert!(!store.path_for(3).with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_overwrite_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested"));

        store.save(&record(0, 1)).unwrap();
        store.save(&record(0, 2)).unwrap();
        assert_eq!(store.load(0).unwrap().unwrap().pid, 2);

        store.clear(0).unwrap();
        assert!(store.load(0).unwrap().is_none());
        // Clearing twice is fine.
        store.clear(0).unwrap();
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        std::fs::write(store.path_for(7), "not json").unwrap();
        assert!(matches!(store.load(7), Err(StateError::Parse(_))));
    }

    #[test]
    fn test_record_serializes_prefix_as_text() {
        let json = serde_json::to_string(&record(1, 5)).unwrap();
        assert!(json.contains("\"44.44.44.44.44.44.44.44.44.44.44.44\""));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::new();
        store.save(&record(1, 10)).unwrap();
        store.save(&record(2, 20)).unwrap();
        assert_eq!(store.load(1).unwrap().unwrap().pid, 10);
        store.clear(1).unwrap();
        assert!(store.load(1).unwrap().is_none());
        assert!(store.load(2).unwrap().is_some());
    }

    #[test]
    fn test_current_process_is_live() {
        let rec = ServerRecord::for_current_process(0, GuidPrefix::new([1; 12]));
        assert_eq!(rec.pid, std::process::id());
        assert!(rec.started_at_ms > 0);
        assert!(rec.is_live());
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_pids_are_not_live() {
        assert!(!pid_alive(0));
        assert!(!pid_alive(u32::MAX));
        // Far above any kernel pid_max.
        assert!(!record(0, i32::MAX as u32).is_live());
    }
}
