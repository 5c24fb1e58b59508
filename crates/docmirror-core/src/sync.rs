//! The sync engine.
//!
//! [`SyncEngine::run`] drives one source through a complete sync:
//!
//! 1. Claim the source (fails fast with [`SyncError::AlreadyRunning`]).
//! 2. Pick a strategy ([`select_strategy`]) unless one is forced.
//! 3. Open a [`SyncRun`] in `running` state.
//! 4. Fetch from the connector and reconcile against the catalog. A
//!    connector without incremental support silently falls back to a full
//!    fetch, and the run records `full`.
//! 5. Chunk every created/updated document and push the chunks to the
//!    indexer; drop the chunks of deleted documents. Indexer failures are
//!    logged and counted, never fatal.
//! 6. Close the run and release the claim, scheduling the next sync:
//!    24 h after a full run, 1 h after an incremental one, or after the
//!    error backoff on failure. Configuration errors are not rescheduled.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::catalog::{DocumentCatalog, ReconcileResult};
use crate::chunk::ChunkingEngine;
use crate::connector::{Connector, SyncCursor};
use crate::error::{ConnectorError, SyncError};
use crate::indexer::{chunk_id, Indexer};
use crate::models::{
    ChangeAction, Chunk, DataSourceState, DocumentChange, OwnerScope, SourceType, SyncCounts,
    SyncMode, SyncResult, SyncRun, SyncStatus, SyncStrategy,
};
use crate::store::{CatalogStore, SyncLedger};

/// Scheduling intervals applied after each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub full_interval: Duration,
    pub incremental_interval: Duration,
    pub error_backoff: Duration,
    /// A source whose last successful sync is older than this gets a full
    /// resync instead of an incremental one.
    pub full_resync_after: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            full_interval: Duration::hours(24),
            incremental_interval: Duration::hours(1),
            error_backoff: Duration::hours(1),
            full_resync_after: Duration::days(7),
        }
    }
}

impl SyncPolicy {
    pub fn interval_after(&self, strategy: SyncStrategy) -> Duration {
        match strategy {
            SyncStrategy::Full => self.full_interval,
            SyncStrategy::Incremental | SyncStrategy::EventDriven => self.incremental_interval,
        }
    }
}

/// Strategy for a run that was not forced.
///
/// The resync window counts from the last full sweep, so a source kept busy
/// by incremental runs still gets a periodic full pass to pick up deletions.
pub fn select_strategy(
    state: &DataSourceState,
    now: DateTime<Utc>,
    policy: &SyncPolicy,
) -> SyncStrategy {
    if state.last_sync_at.is_none() {
        return SyncStrategy::Full;
    }
    match state.last_full_sync_at {
        Some(last) if now - last <= policy.full_resync_after => SyncStrategy::Incremental,
        _ => SyncStrategy::Full,
    }
}

/// Connection parameters used to match webhook payloads to sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub base_url: Option<String>,
    pub workspace: Option<String>,
}

/// A configured source together with its constructed connector.
#[derive(Clone)]
pub struct SyncSource {
    pub id: String,
    pub source_type: SourceType,
    pub owner: OwnerScope,
    pub mode: SyncMode,
    pub params: ConnectionParams,
    pub connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for SyncSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSource")
            .field("id", &self.id)
            .field("source_type", &self.source_type)
            .field("owner", &self.owner)
            .field("mode", &self.mode)
            .field("params", &self.params)
            .field("connector", &self.connector.name())
            .finish()
    }
}

struct Executed {
    strategy: SyncStrategy,
    counts: SyncCounts,
    next_cursor: Option<String>,
    changes: Vec<DocumentChange>,
}

pub struct SyncEngine {
    catalog: DocumentCatalog,
    ledger: Arc<dyn SyncLedger>,
    indexer: Arc<dyn Indexer>,
    chunker: ChunkingEngine,
    policy: SyncPolicy,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        ledger: Arc<dyn SyncLedger>,
        indexer: Arc<dyn Indexer>,
        chunker: ChunkingEngine,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            catalog: DocumentCatalog::new(store),
            ledger,
            indexer,
            chunker,
            policy,
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<dyn SyncLedger> {
        &self.ledger
    }

    pub fn catalog(&self) -> &DocumentCatalog {
        &self.catalog
    }

    pub fn chunker(&self) -> &ChunkingEngine {
        &self.chunker
    }

    pub async fn run(
        &self,
        source: &SyncSource,
        forced: Option<SyncStrategy>,
    ) -> Result<SyncResult, SyncError> {
        self.run_at(source, forced, Utc::now()).await
    }

    /// [`run`](Self::run) with an explicit clock.
    pub async fn run_at(
        &self,
        source: &SyncSource,
        forced: Option<SyncStrategy>,
        now: DateTime<Utc>,
    ) -> Result<SyncResult, SyncError> {
        let started = Instant::now();
        let mut state = self
            .ledger
            .ensure_source(&source.id, source.source_type, now)
            .await?;

        if !self.ledger.try_claim(&source.id).await? {
            debug!(source_id = %source.id, "claim not obtained");
            return Err(SyncError::AlreadyRunning(source.id.clone()));
        }

        let requested = forced.unwrap_or_else(|| select_strategy(&state, now, &self.policy));
        info!(
            source_id = %source.id,
            source_type = %source.source_type,
            strategy = %requested,
            "sync started"
        );

        let mut run = SyncRun::pending(&source.id, requested, now);
        run.status = SyncStatus::Running;
        if let Err(e) = self.ledger.start_run(&run).await {
            state.sync_status = SyncStatus::Error;
            state.sync_message = Some(format!("Sync failed: {}", e));
            state.next_sync_at = Some(now + self.policy.error_backoff);
            self.release(&state).await;
            return Err(e.into());
        }

        let outcome = self.execute(source, &state, requested, now).await;
        let finished = now + Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero());

        match outcome {
            Ok(executed) => {
                let next_run_at = now + self.policy.interval_after(executed.strategy);
                let index_failures = self.index_changes(source, &executed.changes).await;

                run.strategy = executed.strategy;
                run.succeed(
                    executed.counts,
                    executed.next_cursor.clone(),
                    next_run_at,
                    finished,
                );

                let document_count = match self.catalog.store().active_count(&source.id).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(source_id = %source.id, error = %e, "could not count catalog entries");
                        state.document_count
                    }
                };

                state.last_sync_at = Some(now);
                if executed.strategy == SyncStrategy::Full {
                    state.last_full_sync_at = Some(now);
                }
                state.last_sync_cursor = executed.next_cursor.clone();
                state.sync_status = SyncStatus::Success;
                state.sync_message = Some(format!(
                    "Processed {} documents",
                    executed.counts.processed
                ));
                state.next_sync_at = Some(next_run_at);
                state.document_count = document_count;

                let finish = self.ledger.finish_run(&run).await;
                let save = self.ledger.save_state(&state).await;
                finish?;
                save?;

                info!(
                    source_id = %source.id,
                    strategy = %executed.strategy,
                    processed = executed.counts.processed,
                    added = executed.counts.added,
                    updated = executed.counts.updated,
                    deleted = executed.counts.deleted,
                    index_failures,
                    "sync completed"
                );

                Ok(SyncResult {
                    run_id: run.id,
                    source_id: source.id.clone(),
                    strategy: executed.strategy,
                    counts: executed.counts,
                    index_failures,
                    next_cursor: executed.next_cursor,
                    next_run_at,
                    elapsed: started.elapsed(),
                    changes: executed.changes,
                })
            }
            Err(err) => {
                let next = if err.is_retryable() {
                    Some(now + self.policy.error_backoff)
                } else {
                    None
                };
                warn!(source_id = %source.id, error = %err, "sync failed");

                run.fail(SyncCounts::default(), err.to_string(), next, finished);
                state.sync_status = SyncStatus::Error;
                state.sync_message = Some(format!("Sync failed: {}", err));
                state.next_sync_at = next;

                if let Err(e) = self.ledger.finish_run(&run).await {
                    warn!(source_id = %source.id, error = %e, "could not record failed run");
                }
                self.release(&state).await;
                Err(err)
            }
        }
    }

    async fn release(&self, state: &DataSourceState) {
        if let Err(e) = self.ledger.save_state(state).await {
            warn!(source_id = %state.source_id, error = %e, "could not release sync claim");
        }
    }

    async fn execute(
        &self,
        source: &SyncSource,
        state: &DataSourceState,
        requested: SyncStrategy,
        now: DateTime<Utc>,
    ) -> Result<Executed, SyncError> {
        let connector = &source.connector;
        if !connector.is_configured() {
            return Err(SyncError::Configuration {
                source_id: source.id.clone(),
                reason: format!(
                    "{} connector is missing credentials or connection parameters",
                    source.source_type
                ),
            });
        }

        let (strategy, result, next_cursor) = match requested {
            SyncStrategy::Full => self.full(source, now).await?,
            SyncStrategy::Incremental | SyncStrategy::EventDriven => {
                if !connector.supports_incremental() {
                    debug!(source_id = %source.id, "incremental unsupported, running full sync");
                    self.full(source, now).await?
                } else {
                    let cursor = SyncCursor {
                        since: state.last_sync_at,
                        token: state.last_sync_cursor.clone(),
                    };
                    match connector.fetch_since(&cursor).await {
                        Ok(page) => {
                            let result = self
                                .catalog
                                .apply_incremental(&source.id, page.documents, now)
                                .await?;
                            let next = page.next_cursor.or(cursor.token);
                            (requested, result, next)
                        }
                        Err(ConnectorError::IncrementalUnsupported) => {
                            debug!(source_id = %source.id, "incremental unsupported, running full sync");
                            self.full(source, now).await?
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        };

        Ok(Executed {
            strategy,
            counts: result.counts(),
            next_cursor,
            changes: result.into_changes(),
        })
    }

    async fn full(
        &self,
        source: &SyncSource,
        now: DateTime<Utc>,
    ) -> Result<(SyncStrategy, ReconcileResult, Option<String>), SyncError> {
        let docs = source.connector.fetch_all().await?;
        debug!(source_id = %source.id, fetched = docs.len(), "full fetch complete");
        let result = self.catalog.reconcile(&source.id, docs, now).await?;
        Ok((SyncStrategy::Full, result, None))
    }

    /// Push chunks of created/updated documents and drop chunks of deleted
    /// ones. Returns the number of failed indexer calls.
    async fn index_changes(&self, source: &SyncSource, changes: &[DocumentChange]) -> u64 {
        let mut failures = 0u64;
        for change in changes {
            let new_total = match (change.action, &change.document) {
                (ChangeAction::Deleted, _) | (_, None) => 0,
                (_, Some(doc)) => {
                    let chunks = self
                        .chunker
                        .chunk(doc, &change.external_id, source.source_type);
                    for chunk in &chunks {
                        let id = chunk_id(
                            &source.owner,
                            source.source_type,
                            &change.external_id,
                            chunk.chunk_index,
                        );
                        let metadata = chunk_metadata(source, change, chunk);
                        if let Err(e) = self.indexer.upsert(&id, &chunk.text, &metadata).await {
                            warn!(source_id = %source.id, error = %e, "indexer upsert failed");
                            failures += 1;
                        }
                    }
                    chunks.len()
                }
            };

            for index in new_total..change.previous_chunk_count {
                let id = chunk_id(&source.owner, source.source_type, &change.external_id, index);
                if let Err(e) = self.indexer.delete(&id).await {
                    warn!(source_id = %source.id, error = %e, "indexer delete failed");
                    failures += 1;
                }
            }

            if change.action != ChangeAction::Deleted {
                if let Err(e) = self
                    .catalog
                    .store()
                    .set_chunk_count(&source.id, &change.external_id, new_total)
                    .await
                {
                    warn!(source_id = %source.id, error = %e, "could not record chunk count");
                }
            }
        }
        failures
    }
}

fn chunk_metadata(source: &SyncSource, change: &DocumentChange, chunk: &Chunk) -> Value {
    let mut metadata = chunk.metadata.clone();
    metadata.insert("title".to_string(), json!(change.title));
    metadata.insert("url".to_string(), json!(change.url));
    metadata.insert("source_id".to_string(), json!(source.id));
    metadata.insert("source_type".to_string(), json!(source.source_type.as_str()));
    metadata.insert(source.owner.key().to_string(), json!(source.owner.value()));
    metadata.insert("external_id".to_string(), json!(change.external_id));
    metadata.insert("chunk_index".to_string(), json!(chunk.chunk_index));
    metadata.insert("total_chunks".to_string(), json!(chunk.total_chunks));
    metadata.insert("chunk_type".to_string(), json!(chunk.chunk_type.as_str()));
    Value::Object(metadata)
}
