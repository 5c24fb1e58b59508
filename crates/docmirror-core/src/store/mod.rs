//! Storage abstraction for docmirror.
//!
//! Two traits split persistence by concern:
//!
//! - [`CatalogStore`] holds the catalog: one [`CatalogEntry`] per known
//!   external document, keyed by `(source_id, external_id)`.
//! - [`SyncLedger`] holds per-source scheduling state and the append-only
//!   log of [`SyncRun`]s, and provides the per-source claim that keeps two
//!   syncs of the same source from overlapping.
//!
//! Implementations must be `Send + Sync` to work with async runtimes. The
//! in-memory backend in [`memory`] serves tests; the SQLite backend lives
//! in the application crate.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::models::{CatalogEntry, DataSourceState, SourceType, SyncRun};

/// Catalog persistence.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`entries`](CatalogStore::entries) | All entries of a source, tombstones included |
/// | [`get`](CatalogStore::get) | One entry by external id |
/// | [`commit`](CatalogStore::commit) | Write a reconciliation batch atomically |
/// | [`set_chunk_count`](CatalogStore::set_chunk_count) | Record how many chunks were indexed |
/// | [`active_count`](CatalogStore::active_count) | Number of non-deleted entries |
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn entries(&self, source_id: &str) -> Result<Vec<CatalogEntry>, StoreError>;

    async fn get(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<CatalogEntry>, StoreError>;

    /// Upsert every entry of `batch` in a single transaction. Either all
    /// rows are written or none are.
    async fn commit(&self, source_id: &str, batch: &[CatalogEntry]) -> Result<(), StoreError>;

    async fn set_chunk_count(
        &self,
        source_id: &str,
        external_id: &str,
        chunk_count: usize,
    ) -> Result<(), StoreError>;

    async fn active_count(&self, source_id: &str) -> Result<u64, StoreError>;
}

/// Source state and sync-run log.
#[async_trait]
pub trait SyncLedger: Send + Sync {
    /// Return the state of `source_id`, creating a pending row (due `now`)
    /// if the source has never been seen.
    async fn ensure_source(
        &self,
        source_id: &str,
        source_type: SourceType,
        now: DateTime<Utc>,
    ) -> Result<DataSourceState, StoreError>;

    async fn source_state(&self, source_id: &str) -> Result<Option<DataSourceState>, StoreError>;

    async fn list_sources(&self) -> Result<Vec<DataSourceState>, StoreError>;

    /// Atomically move `source_id` to `running`. Returns `false` when it is
    /// already running (or unknown).
    async fn try_claim(&self, source_id: &str) -> Result<bool, StoreError>;

    /// Overwrite the state row. Writing a non-running status releases the
    /// claim.
    async fn save_state(&self, state: &DataSourceState) -> Result<(), StoreError>;

    async fn start_run(&self, run: &SyncRun) -> Result<(), StoreError>;

    /// Record the final state of a run. Rows that already reached a
    /// terminal status are left untouched.
    async fn finish_run(&self, run: &SyncRun) -> Result<(), StoreError>;

    /// Most recent runs first.
    async fn runs(&self, source_id: &str, limit: usize) -> Result<Vec<SyncRun>, StoreError>;

    /// Sources with `next_sync_at <= now` that are not running, soonest first.
    async fn due_sources(&self, now: DateTime<Utc>) -> Result<Vec<DataSourceState>, StoreError>;

    /// Set `next_sync_at`. Returns `false` when the source is unknown.
    async fn set_next_sync(
        &self,
        source_id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Recover from a crash: every source still `running` becomes `error`
    /// and is rescheduled after `backoff`; every open run is closed as
    /// interrupted. Returns the number of sources reset.
    async fn reset_interrupted(
        &self,
        now: DateTime<Utc>,
        backoff: Duration,
    ) -> Result<usize, StoreError>;
}

/// Message recorded on runs and sources recovered by
/// [`SyncLedger::reset_interrupted`].
pub const INTERRUPTED_MESSAGE: &str = "Sync interrupted before completion";
