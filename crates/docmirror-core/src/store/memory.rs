//! In-memory [`CatalogStore`] and [`SyncLedger`] for tests.
//!
//! Everything lives in maps behind `parking_lot` mutexes. The claim is a
//! check-and-set under the sources lock, matching the conditional UPDATE of
//! the SQLite backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::models::{CatalogEntry, DataSourceState, SourceType, SyncRun, SyncStatus};

use super::{CatalogStore, SyncLedger, INTERRUPTED_MESSAGE};

#[derive(Default)]
pub struct MemoryStore {
    catalog: Mutex<HashMap<String, BTreeMap<String, CatalogEntry>>>,
    sources: Mutex<BTreeMap<String, DataSourceState>>,
    runs: Mutex<Vec<SyncRun>>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent [`CatalogStore::commit`] fail until reset.
    pub fn set_commit_failure(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn entries(&self, source_id: &str) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self
            .catalog
            .lock()
            .get(source_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<CatalogEntry>, StoreError> {
        Ok(self
            .catalog
            .lock()
            .get(source_id)
            .and_then(|m| m.get(external_id).cloned()))
    }

    async fn commit(&self, source_id: &str, batch: &[CatalogEntry]) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected commit failure"));
        }
        let mut catalog = self.catalog.lock();
        let entries = catalog.entry(source_id.to_string()).or_default();
        for entry in batch {
            entries.insert(entry.external_id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn set_chunk_count(
        &self,
        source_id: &str,
        external_id: &str,
        chunk_count: usize,
    ) -> Result<(), StoreError> {
        if let Some(entry) = self
            .catalog
            .lock()
            .get_mut(source_id)
            .and_then(|m| m.get_mut(external_id))
        {
            entry.chunk_count = chunk_count;
        }
        Ok(())
    }

    async fn active_count(&self, source_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .catalog
            .lock()
            .get(source_id)
            .map(|m| m.values().filter(|e| !e.is_deleted).count() as u64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl SyncLedger for MemoryStore {
    async fn ensure_source(
        &self,
        source_id: &str,
        source_type: SourceType,
        now: DateTime<Utc>,
    ) -> Result<DataSourceState, StoreError> {
        let mut sources = self.sources.lock();
        let state = sources
            .entry(source_id.to_string())
            .or_insert_with(|| DataSourceState::new(source_id, source_type, now));
        Ok(state.clone())
    }

    async fn source_state(&self, source_id: &str) -> Result<Option<DataSourceState>, StoreError> {
        Ok(self.sources.lock().get(source_id).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<DataSourceState>, StoreError> {
        Ok(self.sources.lock().values().cloned().collect())
    }

    async fn try_claim(&self, source_id: &str) -> Result<bool, StoreError> {
        let mut sources = self.sources.lock();
        match sources.get_mut(source_id) {
            Some(state) if state.sync_status != SyncStatus::Running => {
                state.sync_status = SyncStatus::Running;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_state(&self, state: &DataSourceState) -> Result<(), StoreError> {
        self.sources
            .lock()
            .insert(state.source_id.clone(), state.clone());
        Ok(())
    }

    async fn start_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        self.runs.lock().push(run.clone());
        Ok(())
    }

    async fn finish_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        let mut runs = self.runs.lock();
        if let Some(stored) = runs
            .iter_mut()
            .find(|r| r.id == run.id && r.status == SyncStatus::Running)
        {
            *stored = run.clone();
        }
        Ok(())
    }

    async fn runs(&self, source_id: &str, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        Ok(self
            .runs
            .lock()
            .iter()
            .rev()
            .filter(|r| r.source_id == source_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn due_sources(&self, now: DateTime<Utc>) -> Result<Vec<DataSourceState>, StoreError> {
        let mut due: Vec<DataSourceState> = self
            .sources
            .lock()
            .values()
            .filter(|s| s.sync_status != SyncStatus::Running)
            .filter(|s| s.next_sync_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_sync_at);
        Ok(due)
    }

    async fn set_next_sync(
        &self,
        source_id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        match self.sources.lock().get_mut(source_id) {
            Some(state) => {
                state.next_sync_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_interrupted(
        &self,
        now: DateTime<Utc>,
        backoff: Duration,
    ) -> Result<usize, StoreError> {
        let mut reset = 0;
        for state in self.sources.lock().values_mut() {
            if state.sync_status == SyncStatus::Running {
                state.sync_status = SyncStatus::Error;
                state.sync_message = Some(INTERRUPTED_MESSAGE.to_string());
                state.next_sync_at = Some(now + backoff);
                reset += 1;
            }
        }
        for run in self.runs.lock().iter_mut() {
            if !run.status.is_terminal() {
                let counts = run.counts;
                run.fail(counts, INTERRUPTED_MESSAGE, Some(now + backoff), now);
            }
        }
        Ok(reset)
    }
}
