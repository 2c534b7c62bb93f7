// crates/rule-arbiter-core/src/runtime/store.rs
// ============================================================================
// Module: Rule Arbiter In-Memory Stores
// Description: In-memory run log and result store.
// Purpose: Provide deterministic stores for tests and single-process hosts.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryRunLog`] and [`InMemoryResultStore`] keep everything in
//! mutex-protected maps. Contents are lost when the process exits; use the
//! SQLite backend for durable history.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::hashing::RequestHash;
use crate::core::identifiers::RequestKind;
use crate::core::identifiers::RunId;
use crate::core::run_log::NewRunLogEntry;
use crate::core::run_log::RunLogEntry;
use crate::core::time::Timestamp;
use crate::interfaces::ResultStore;
use crate::interfaces::RunLog;
use crate::interfaces::StoreError;
use crate::interfaces::StoredResult;

// ============================================================================
// SECTION: In-Memory Run Log
// ============================================================================

/// Mutable run log contents.
#[derive(Debug, Default)]
struct RunLogState {
    /// Last allocated run id.
    last_id: u64,
    /// Entries keyed by run id.
    entries: BTreeMap<RunId, RunLogEntry>,
}

/// In-memory run log.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRunLog {
    /// Log state protected by a mutex.
    state: Arc<Mutex<RunLogState>>,
}

impl InMemoryRunLog {
    /// Creates an empty run log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the log state.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RunLogState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Store("run log mutex poisoned".to_string()))
    }
}

impl RunLog for InMemoryRunLog {
    fn create(&self, entry: NewRunLogEntry) -> Result<RunLogEntry, StoreError> {
        let mut guard = self.lock()?;
        guard.last_id = guard
            .last_id
            .checked_add(1)
            .ok_or_else(|| StoreError::Store("run id space exhausted".to_string()))?;
        let row = RunLogEntry::pending(RunId::new(guard.last_id), entry);
        guard.entries.insert(row.run_id, row.clone());
        Ok(row)
    }

    fn find(&self, run_id: RunId) -> Result<Option<RunLogEntry>, StoreError> {
        Ok(self.lock()?.entries.get(&run_id).cloned())
    }

    fn find_by_request(
        &self,
        kind: &RequestKind,
        hash: &RequestHash,
    ) -> Result<Vec<RunLogEntry>, StoreError> {
        let guard = self.lock()?;
        let mut matches: Vec<RunLogEntry> = guard
            .entries
            .values()
            .filter(|entry| &entry.request_kind == kind && &entry.request_hash == hash)
            .cloned()
            .collect();
        matches.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then(right.run_id.cmp(&left.run_id))
        });
        Ok(matches)
    }

    fn update(&self, entry: &RunLogEntry) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let Some(slot) = guard.entries.get_mut(&entry.run_id) else {
            return Err(StoreError::Invalid(format!("unknown run id {}", entry.run_id)));
        };
        *slot = entry.clone();
        Ok(())
    }

    fn delete_older_than(&self, cutoff: Timestamp) -> Result<Vec<RunId>, StoreError> {
        let mut guard = self.lock()?;
        let expired: Vec<RunId> = guard
            .entries
            .values()
            .filter(|entry| entry.updated_at < cutoff)
            .map(|entry| entry.run_id)
            .collect();
        for run_id in &expired {
            guard.entries.remove(run_id);
        }
        Ok(expired)
    }
}

// ============================================================================
// SECTION: In-Memory Result Store
// ============================================================================

/// In-memory result store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryResultStore {
    /// Results keyed by run id.
    results: Arc<Mutex<BTreeMap<RunId, StoredResult>>>,
}

impl InMemoryResultStore {
    /// Creates an empty result store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for InMemoryResultStore {
    fn save(&self, run_id: RunId, result: &StoredResult) -> Result<(), StoreError> {
        self.results
            .lock()
            .map_err(|_| StoreError::Store("result store mutex poisoned".to_string()))?
            .insert(run_id, result.clone());
        Ok(())
    }

    fn load(&self, run_id: RunId) -> Result<Option<StoredResult>, StoreError> {
        let guard = self
            .results
            .lock()
            .map_err(|_| StoreError::Store("result store mutex poisoned".to_string()))?;
        Ok(guard.get(&run_id).cloned())
    }

    fn remove(&self, run_id: RunId) -> Result<bool, StoreError> {
        let mut guard = self
            .results
            .lock()
            .map_err(|_| StoreError::Store("result store mutex poisoned".to_string()))?;
        Ok(guard.remove(&run_id).is_some())
    }
}
