//! Status store shared by execution workers
//!
//! Every mutation goes through `update`, which holds the map lock only for
//! the read-modify-write and persists the resulting snapshot afterwards.
//! Snapshots carry a version so an older one never overwrites a newer one
//! when two workers persist at the same time.

use crate::errors::{Result, ScanError};
use crate::status::types::{OperationResult, OperationState, OperationStatus, StatusSummary};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Default status file name
pub const DEFAULT_STATUS_FILE: &str = "execution_status.json";

#[derive(Debug, Default)]
struct StoreState {
    operations: HashMap<String, OperationStatus>,
    version: u64,
}

/// Thread-safe, disk-backed record of operation lifecycles
#[derive(Debug)]
pub struct StatusStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    /// Version of the last snapshot written to disk
    persisted_version: Mutex<u64>,
}

impl StatusStore {
    /// Create an empty store backed by `path`; nothing is read or written yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(StoreState::default()),
            persisted_version: Mutex::new(0),
        }
    }

    /// Create a store and hydrate it from `path` if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a status transition for `tool_name`
    ///
    /// Creates the record on first sight. Terminal records are frozen:
    /// later transitions are ignored. Persistence failures are logged and
    /// never returned; the run does not depend on them.
    pub fn update(
        &self,
        tool_name: &str,
        status: OperationState,
        command: &str,
        result: Option<OperationResult>,
    ) {
        let snapshot = {
            let mut state = self.lock_state();

            match state.operations.get_mut(tool_name) {
                None => {
                    let mut op =
                        OperationStatus::new(tool_name.to_string(), status, command.to_string());
                    op.result = result;
                    state.operations.insert(tool_name.to_string(), op);
                }
                Some(op) if op.status.is_terminal() => {
                    warn!(
                        tool = tool_name,
                        current = %op.status,
                        requested = %status,
                        "ignoring transition out of terminal state"
                    );
                    return;
                }
                Some(op) => {
                    op.status = status;
                    op.command = command.to_string();
                    if status.is_terminal() && op.end_time.is_none() {
                        op.end_time = Some(Utc::now());
                    }
                    if let Some(result) = result {
                        match op.result.as_mut() {
                            Some(existing) => existing.merge(result),
                            None => op.result = Some(result),
                        }
                    }
                }
            }

            state.version += 1;
            debug!(tool = tool_name, status = %status, "operation updated");
            Self::snapshot(&state)
        };

        if let Err(e) = self.write_snapshot(snapshot) {
            warn!(path = %self.path.display(), error = %e, "failed to persist status");
        }
    }

    /// Write the full map to disk now
    pub fn persist(&self) -> Result<()> {
        let snapshot = Self::snapshot(&self.lock_state());
        self.write_snapshot(snapshot)
    }

    /// Replace the in-memory map with the file contents, if the file exists
    ///
    /// Returns the number of records loaded.
    pub fn load(&self) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }

        let json = fs::read_to_string(&self.path)?;
        let raw: BTreeMap<String, OperationStatus> =
            serde_json::from_str(&json).map_err(|e| ScanError::Persistence {
                path: self.path.clone(),
                reason: format!("failed to parse status file: {}", e),
            })?;

        let operations: HashMap<String, OperationStatus> = raw
            .into_iter()
            .map(|(name, mut op)| {
                op.tool_name = name.clone();
                (name, op)
            })
            .collect();
        let count = operations.len();

        let mut state = self.lock_state();
        state.operations = operations;
        state.version += 1;
        // What is on disk now matches memory
        *self.lock_persisted() = state.version;

        Ok(count)
    }

    /// Snapshot of one record
    pub fn get(&self, tool_name: &str) -> Option<OperationStatus> {
        self.lock_state().operations.get(tool_name).cloned()
    }

    /// Snapshot of every record, oldest first
    pub fn operations(&self) -> Vec<OperationStatus> {
        let mut ops: Vec<OperationStatus> =
            self.lock_state().operations.values().cloned().collect();
        ops.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.tool_name.cmp(&b.tool_name))
        });
        ops
    }

    /// Aggregate counts; `in_progress` is derived, never counted
    pub fn summary(&self) -> StatusSummary {
        let state = self.lock_state();
        let total = state.operations.len();
        let completed = state
            .operations
            .values()
            .filter(|op| op.status == OperationState::Completed)
            .count();
        let failed = state
            .operations
            .values()
            .filter(|op| op.status.is_failure())
            .count();
        StatusSummary::from_counts(total, completed, failed)
    }

    pub fn len(&self) -> usize {
        self.lock_state().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().operations.is_empty()
    }

    fn snapshot(state: &StoreState) -> (u64, BTreeMap<String, OperationStatus>) {
        let ops = state
            .operations
            .iter()
            .map(|(name, op)| (name.clone(), op.clone()))
            .collect();
        (state.version, ops)
    }

    /// Write-to-temp-then-rename so readers never see a torn file
    fn write_snapshot(&self, snapshot: (u64, BTreeMap<String, OperationStatus>)) -> Result<()> {
        let (version, ops) = snapshot;
        let mut persisted = self.lock_persisted();
        if version < *persisted {
            // A newer snapshot is already on disk
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&ops)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.persistence_error(e))?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| self.persistence_error(e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| self.persistence_error(e))?;

        *persisted = version;
        Ok(())
    }

    fn persistence_error(&self, err: std::io::Error) -> ScanError {
        ScanError::Persistence {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        // A panicking worker must not take status reporting down with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_persisted(&self) -> MutexGuard<'_, u64> {
        self.persisted_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (StatusStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = StatusStore::new(temp_dir.path().join(DEFAULT_STATUS_FILE));
        (store, temp_dir)
    }

    #[test]
    fn test_first_update_creates_record() {
        let (store, _temp) = create_test_store();
        store.update("nmap", OperationState::Initializing, "nmap {target}", None);

        let op = store.get("nmap").unwrap();
        assert_eq!(op.tool_name, "nmap");
        assert_eq!(op.status, OperationState::Initializing);
        assert_eq!(op.command, "nmap {target}");
        assert!(op.end_time.is_none());
        assert!(op.result.is_none());
    }

    #[test]
    fn test_lifecycle_sets_end_time_once() {
        let (store, _temp) = create_test_store();
        store.update("nmap", OperationState::Initializing, "nmap {target}", None);
        let start = store.get("nmap").unwrap().start_time;

        store.update("nmap", OperationState::Running, "nmap 10.0.0.1", None);
        let running = store.get("nmap").unwrap();
        assert_eq!(running.command, "nmap 10.0.0.1");
        assert_eq!(running.start_time, start);
        assert!(running.end_time.is_none());

        store.update(
            "nmap",
            OperationState::Completed,
            "nmap 10.0.0.1",
            Some(OperationResult::default().with_exit_code(0)),
        );
        let done = store.get("nmap").unwrap();
        let end = done.end_time.unwrap();
        assert!(end >= start);
        assert_eq!(done.result.unwrap().exit_code, Some(0));

        // Frozen once terminal
        store.update("nmap", OperationState::Running, "nmap again", None);
        let after = store.get("nmap").unwrap();
        assert_eq!(after.status, OperationState::Completed);
        assert_eq!(after.end_time, Some(end));
    }

    #[test]
    fn test_update_without_result_keeps_existing_payload() {
        let (store, _temp) = create_test_store();
        store.update(
            "ffuf",
            OperationState::Initializing,
            "ffuf",
            Some(OperationResult::default().with_log_path("ffuf.log")),
        );
        store.update("ffuf", OperationState::Running, "ffuf -u x", None);

        let op = store.get("ffuf").unwrap();
        assert_eq!(op.result.unwrap().log_path.as_deref(), Some("ffuf.log"));
    }

    #[test]
    fn test_every_update_is_persisted() {
        let (store, _temp) = create_test_store();
        store.update("a", OperationState::Running, "echo a", None);
        assert!(store.path().exists());

        let json = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["a"]["status"], "Running");
        assert_eq!(value["a"]["command"], "echo a");
        assert!(value["a"]["end_time"].is_null());
        assert!(value["a"]["result"].is_null());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let (store, temp) = create_test_store();
        store.update("a", OperationState::Running, "echo a", None);

        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let (store, _temp) = create_test_store();
        store.update("a", OperationState::Initializing, "echo {target}", None);
        store.update(
            "a",
            OperationState::Completed,
            "echo x",
            Some(
                OperationResult::default()
                    .with_exit_code(0)
                    .with_log_path("outputs/a/x.log"),
            ),
        );
        store.update("b", OperationState::Initializing, "exit 1", None);
        store.update(
            "b",
            OperationState::Failed,
            "exit 1",
            Some(OperationResult::default().with_exit_code(1)),
        );
        store.update("c", OperationState::Running, "sleep 100", None);

        let reloaded = StatusStore::open(store.path()).unwrap();
        assert_eq!(reloaded.len(), 3);

        for name in ["a", "b", "c"] {
            let original = store.get(name).unwrap();
            let loaded = reloaded.get(name).unwrap();
            assert_eq!(loaded.tool_name, name);
            assert_eq!(loaded.status, original.status);
            assert_eq!(loaded.command, original.command);
            assert_eq!(loaded.end_time.is_some(), original.end_time.is_some());
            assert_eq!(
                loaded.result.as_ref().and_then(|r| r.exit_code),
                original.result.as_ref().and_then(|r| r.exit_code)
            );
        }
        assert_eq!(reloaded.summary(), store.summary());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.load().unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_persistence_error() {
        let (store, _temp) = create_test_store();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(
            store.load(),
            Err(ScanError::Persistence { .. })
        ));
    }

    #[test]
    fn test_persist_failure_does_not_break_update() {
        let temp_dir = TempDir::new().unwrap();
        // Parent "directory" is a regular file, so every write fails
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = StatusStore::new(blocker.join("status.json"));

        store.update("a", OperationState::Running, "echo a", None);
        assert_eq!(store.get("a").unwrap().status, OperationState::Running);
        assert!(store.persist().is_err());
    }

    #[test]
    fn test_summary_counts() {
        let (store, _temp) = create_test_store();
        store.update("ok", OperationState::Completed, "true", None);
        store.update("bad", OperationState::Failed, "false", None);
        store.update("boom", OperationState::ExecutionError, "nope", None);
        store.update("busy", OperationState::Running, "sleep 1", None);

        let summary = store.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.in_progress, 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let (store, _temp) = create_test_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let name = format!("tool{}", i);
                    store.update(&name, OperationState::Initializing, "cmd", None);
                    store.update(&name, OperationState::Running, "cmd", None);
                    store.update(&name, OperationState::Completed, "cmd", None);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 32);
        assert_eq!(store.summary().completed, 32);

        // Latest snapshot reached disk
        let reloaded = StatusStore::open(store.path()).unwrap();
        assert_eq!(reloaded.summary().completed, 32);
    }
}
