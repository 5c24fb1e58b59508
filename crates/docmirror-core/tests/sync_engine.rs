//! End-to-end scenarios for the sync engine over the in-memory store and
//! indexer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use docmirror_core::chunk::{ChunkingConfig, ChunkingEngine};
use docmirror_core::connector::{Connector, FetchPage, SyncCursor};
use docmirror_core::error::{ConnectorError, SyncError};
use docmirror_core::hash::external_id;
use docmirror_core::indexer::{chunk_id, MemoryIndexer};
use docmirror_core::models::{
    OwnerScope, RawDocument, SourceType, SyncMode, SyncStatus, SyncStrategy,
};
use docmirror_core::store::memory::MemoryStore;
use docmirror_core::store::{CatalogStore, SyncLedger};
use docmirror_core::sync::{ConnectionParams, SyncEngine, SyncPolicy, SyncSource};

#[derive(Default)]
struct ScriptedConnector {
    documents: Mutex<Vec<RawDocument>>,
    page: Mutex<Option<FetchPage>>,
    incremental: bool,
    unconfigured: bool,
    failure: Mutex<Option<u16>>,
    cursors: Mutex<Vec<SyncCursor>>,
}

impl ScriptedConnector {
    fn full_only(docs: Vec<RawDocument>) -> Arc<Self> {
        Arc::new(Self {
            documents: Mutex::new(docs),
            ..Default::default()
        })
    }

    fn incremental(docs: Vec<RawDocument>) -> Arc<Self> {
        Arc::new(Self {
            documents: Mutex::new(docs),
            incremental: true,
            ..Default::default()
        })
    }

    fn set_documents(&self, docs: Vec<RawDocument>) {
        *self.documents.lock() = docs;
    }

    fn set_page(&self, docs: Vec<RawDocument>, cursor: Option<&str>) {
        *self.page.lock() = Some(FetchPage {
            documents: docs,
            next_cursor: cursor.map(str::to_string),
        });
    }

    fn fail_with(&self, status: u16) {
        *self.failure.lock() = Some(status);
    }

    fn check_failure(&self) -> Result<(), ConnectorError> {
        match *self.failure.lock() {
            Some(status) => Err(ConnectorError::Http {
                status,
                url: "https://wiki.example/api".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Generic
    }

    fn is_configured(&self) -> bool {
        !self.unconfigured
    }

    async fn test_connection(&self) -> bool {
        self.failure.lock().is_none()
    }

    async fn fetch_all(&self) -> Result<Vec<RawDocument>, ConnectorError> {
        self.check_failure()?;
        Ok(self.documents.lock().clone())
    }

    fn supports_incremental(&self) -> bool {
        self.incremental
    }

    async fn fetch_since(&self, cursor: &SyncCursor) -> Result<FetchPage, ConnectorError> {
        self.check_failure()?;
        self.cursors.lock().push(cursor.clone());
        Ok(self.page.lock().take().unwrap_or_default())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    indexer: Arc<MemoryIndexer>,
    engine: SyncEngine,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let indexer = Arc::new(MemoryIndexer::new());
    let engine = SyncEngine::new(
        store.clone(),
        store.clone(),
        indexer.clone(),
        ChunkingEngine::new(ChunkingConfig::default()).unwrap(),
        SyncPolicy::default(),
    );
    Harness {
        store,
        indexer,
        engine,
    }
}

fn source(connector: Arc<ScriptedConnector>) -> SyncSource {
    SyncSource {
        id: "wiki".to_string(),
        source_type: SourceType::Generic,
        owner: OwnerScope::Team("platform".to_string()),
        mode: SyncMode::Scheduled,
        params: ConnectionParams::default(),
        connector,
    }
}

fn doc(name: &str, content: &str) -> RawDocument {
    RawDocument::new(name, content).with_url(format!("https://wiki.example/{}", name))
}

fn words(n: usize) -> String {
    (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
}

#[tokio::test]
async fn test_full_sync_is_idempotent() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha"), doc("b", "beta")]);
    let src = source(conn);

    let first = h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();
    assert_eq!(first.counts.added, 2);
    assert_eq!(first.counts.processed, 2);

    let second = h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();
    assert_eq!(second.counts.added, 0);
    assert_eq!(second.counts.updated, 0);
    assert_eq!(second.counts.deleted, 0);
    assert_eq!(second.counts.processed, 2);
    assert!(second.changes.is_empty());
}

#[tokio::test]
async fn test_scenario_keep_add_remove() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha"), doc("b", "beta")]);
    let src = source(conn.clone());
    h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();

    conn.set_documents(vec![doc("a", "alpha"), doc("c", "gamma")]);
    let result = h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();
    assert_eq!(result.counts.added, 1);
    assert_eq!(result.counts.updated, 0);
    assert_eq!(result.counts.deleted, 1);

    let b = h
        .store
        .get("wiki", &external_id(&doc("b", "")))
        .await
        .unwrap()
        .unwrap();
    assert!(b.is_deleted);
    assert!(b.deleted_at.is_some());
}

#[tokio::test]
async fn test_deletion_emitted_exactly_once() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha"), doc("b", "beta")]);
    let src = source(conn.clone());
    h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();

    conn.set_documents(vec![doc("a", "alpha")]);
    let first = h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();
    assert_eq!(first.counts.deleted, 1);

    let second = h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();
    assert_eq!(second.counts.deleted, 0);
}

#[tokio::test]
async fn test_resurrected_document_is_updated_and_active() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha")]);
    let src = source(conn.clone());
    h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();

    conn.set_documents(vec![]);
    h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();
    assert!(h.indexer.is_empty());

    conn.set_documents(vec![doc("a", "alpha")]);
    let result = h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();
    assert_eq!(result.counts.updated, 1);
    assert_eq!(result.counts.added, 0);

    let entry = h
        .store
        .get("wiki", &external_id(&doc("a", "")))
        .await
        .unwrap()
        .unwrap();
    assert!(!entry.is_deleted);
    assert_eq!(h.indexer.len(), 1);
}

#[tokio::test]
async fn test_incremental_never_deletes_implicitly() {
    let h = harness();
    let conn = ScriptedConnector::incremental(vec![doc("a", "alpha"), doc("b", "beta")]);
    let src = source(conn.clone());
    let t0 = Utc::now();
    let first = h.engine.run_at(&src, None, t0).await.unwrap();
    assert_eq!(first.strategy, SyncStrategy::Full);

    conn.set_page(vec![doc("a", "alpha v2")], Some("cursor-2"));
    let second = h
        .engine
        .run_at(&src, None, t0 + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(second.strategy, SyncStrategy::Incremental);
    assert_eq!(second.counts.updated, 1);
    assert_eq!(second.counts.deleted, 0);
    assert_eq!(second.next_cursor.as_deref(), Some("cursor-2"));
    assert_eq!(h.store.active_count("wiki").await.unwrap(), 2);

    let cursors = conn.cursors.lock().clone();
    assert_eq!(cursors[0].since, Some(t0));
    assert_eq!(cursors[0].token, None);
}

#[tokio::test]
async fn test_incremental_honors_deletion_markers() {
    let h = harness();
    let conn = ScriptedConnector::incremental(vec![doc("a", "alpha"), doc("b", "beta")]);
    let src = source(conn.clone());
    let t0 = Utc::now();
    h.engine.run_at(&src, None, t0).await.unwrap();

    conn.set_page(
        vec![RawDocument::tombstone("https://wiki.example/b")],
        None,
    );
    let result = h
        .engine
        .run_at(&src, None, t0 + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(result.counts.deleted, 1);
    assert_eq!(h.store.active_count("wiki").await.unwrap(), 1);
}

#[tokio::test]
async fn test_incremental_falls_back_to_full() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha"), doc("b", "beta")]);
    let src = source(conn.clone());
    h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();

    conn.set_documents(vec![doc("a", "alpha")]);
    let result = h
        .engine
        .run(&src, Some(SyncStrategy::Incremental))
        .await
        .unwrap();
    assert_eq!(result.strategy, SyncStrategy::Full);
    assert_eq!(result.counts.deleted, 1);

    let runs = h.store.runs("wiki", 1).await.unwrap();
    assert_eq!(runs[0].strategy, SyncStrategy::Full);
}

#[tokio::test]
async fn test_success_schedules_by_strategy() {
    let h = harness();
    let conn = ScriptedConnector::incremental(vec![doc("a", "alpha")]);
    let src = source(conn);
    let t0 = Utc::now();

    h.engine.run_at(&src, None, t0).await.unwrap();
    let state = h.store.source_state("wiki").await.unwrap().unwrap();
    assert_eq!(state.sync_status, SyncStatus::Success);
    assert_eq!(state.next_sync_at, Some(t0 + Duration::hours(24)));
    assert_eq!(state.last_sync_at, Some(t0));
    assert_eq!(state.document_count, 1);
    assert_eq!(state.sync_message.as_deref(), Some("Processed 1 documents"));

    let t1 = t0 + Duration::hours(3);
    h.engine
        .run_at(&src, Some(SyncStrategy::EventDriven), t1)
        .await
        .unwrap();
    let state = h.store.source_state("wiki").await.unwrap().unwrap();
    assert_eq!(state.next_sync_at, Some(t1 + Duration::hours(1)));
    let runs = h.store.runs("wiki", 10).await.unwrap();
    assert_eq!(runs[0].strategy, SyncStrategy::EventDriven);
    assert_eq!(runs.len(), 2);
}

#[tokio::test]
async fn test_stale_last_sync_forces_full() {
    let h = harness();
    let conn = ScriptedConnector::incremental(vec![doc("a", "alpha")]);
    let src = source(conn);
    let t0 = Utc::now();
    h.engine.run_at(&src, None, t0).await.unwrap();

    let later = t0 + Duration::days(8);
    let result = h.engine.run_at(&src, None, later).await.unwrap();
    assert_eq!(result.strategy, SyncStrategy::Full);
}

#[tokio::test]
async fn test_daily_incremental_runs_still_get_weekly_full_sweep() {
    let h = harness();
    let conn = ScriptedConnector::incremental(vec![doc("a", "alpha"), doc("b", "beta")]);
    let src = source(conn.clone());
    let t0 = Utc::now();
    h.engine.run_at(&src, None, t0).await.unwrap();

    for day in 1..=7 {
        let result = h
            .engine
            .run_at(&src, None, t0 + Duration::days(day))
            .await
            .unwrap();
        assert_eq!(result.strategy, SyncStrategy::Incremental, "day {}", day);
    }

    // "b" vanished without a deletion marker; only a full sweep notices.
    conn.set_documents(vec![doc("a", "alpha")]);
    let day8 = t0 + Duration::days(8) + Duration::minutes(1);
    let result = h.engine.run_at(&src, None, day8).await.unwrap();
    assert_eq!(result.strategy, SyncStrategy::Full);
    assert_eq!(result.counts.deleted, 1);

    let state = h.store.source_state("wiki").await.unwrap().unwrap();
    assert_eq!(state.last_full_sync_at, Some(day8));
}

#[tokio::test]
async fn test_connector_error_backs_off() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha")]);
    let src = source(conn.clone());
    let t0 = Utc::now();
    h.engine.run_at(&src, None, t0).await.unwrap();

    conn.fail_with(503);
    let t1 = t0 + Duration::hours(25);
    let err = h.engine.run_at(&src, None, t1).await.unwrap_err();
    assert!(matches!(err, SyncError::Connector(ConnectorError::Http { status: 503, .. })));
    assert!(err.is_retryable());

    let state = h.store.source_state("wiki").await.unwrap().unwrap();
    assert_eq!(state.sync_status, SyncStatus::Error);
    assert_eq!(state.next_sync_at, Some(t1 + Duration::hours(1)));
    assert_eq!(state.last_sync_at, Some(t0));
    assert!(state.sync_message.unwrap().starts_with("Sync failed:"));

    let run = &h.store.runs("wiki", 1).await.unwrap()[0];
    assert_eq!(run.status, SyncStatus::Error);
    assert!(run.error_message.as_deref().unwrap().contains("503"));
    assert_eq!(run.next_run_at, Some(t1 + Duration::hours(1)));
    assert!(run.completed_at.is_some());

    // Catalog untouched by the failed run.
    assert_eq!(h.store.active_count("wiki").await.unwrap(), 1);
}

#[tokio::test]
async fn test_configuration_error_not_rescheduled() {
    let h = harness();
    let conn = Arc::new(ScriptedConnector {
        unconfigured: true,
        ..Default::default()
    });
    let src = source(conn);

    let err = h.engine.run(&src, None).await.unwrap_err();
    assert!(matches!(err, SyncError::Configuration { .. }));
    assert!(!err.is_retryable());

    let state = h.store.source_state("wiki").await.unwrap().unwrap();
    assert_eq!(state.sync_status, SyncStatus::Error);
    assert_eq!(state.next_sync_at, None);
    let run = &h.store.runs("wiki", 1).await.unwrap()[0];
    assert_eq!(run.status, SyncStatus::Error);
    assert_eq!(run.next_run_at, None);
}

#[tokio::test]
async fn test_store_failure_is_reconciliation_error() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha")]);
    let src = source(conn);
    h.store.set_commit_failure(true);

    let err = h.engine.run(&src, None).await.unwrap_err();
    assert!(matches!(err, SyncError::Reconciliation(_)));
    let state = h.store.source_state("wiki").await.unwrap().unwrap();
    assert_eq!(state.sync_status, SyncStatus::Error);
    assert!(state.next_sync_at.is_some());
    assert!(h.indexer.is_empty());
}

#[tokio::test]
async fn test_indexer_failure_does_not_fail_run() {
    let h = harness();
    h.indexer.fail_when_text_contains("poison");
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha"), doc("b", "poison pill")]);
    let src = source(conn);

    let result = h.engine.run(&src, None).await.unwrap();
    assert_eq!(result.counts.added, 2);
    assert_eq!(result.index_failures, 1);
    assert_eq!(h.indexer.len(), 1);

    let state = h.store.source_state("wiki").await.unwrap().unwrap();
    assert_eq!(state.sync_status, SyncStatus::Success);
}

#[tokio::test]
async fn test_claimed_source_is_rejected_without_run_row() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha")]);
    let src = source(conn);
    h.store
        .ensure_source("wiki", SourceType::Generic, Utc::now())
        .await
        .unwrap();
    assert!(h.store.try_claim("wiki").await.unwrap());

    let err = h.engine.run(&src, None).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyRunning(ref id) if id == "wiki"));
    assert!(h.store.runs("wiki", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shrunk_document_drops_stale_chunks() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("big", &words(2500))]);
    let src = source(conn.clone());
    let owner = src.owner.clone();
    let ext = external_id(&doc("big", ""));

    h.engine.run(&src, None).await.unwrap();
    assert_eq!(h.indexer.len(), 3);

    conn.set_documents(vec![doc("big", "now tiny")]);
    h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();
    assert_eq!(
        h.indexer.ids(),
        vec![chunk_id(&owner, SourceType::Generic, &ext, 0)]
    );
    let entry = h.store.get("wiki", &ext).await.unwrap().unwrap();
    assert_eq!(entry.chunk_count, 1);

    conn.set_documents(vec![]);
    h.engine.run(&src, Some(SyncStrategy::Full)).await.unwrap();
    assert!(h.indexer.is_empty());
}

#[tokio::test]
async fn test_chunk_metadata_carries_owner_and_position() {
    let h = harness();
    let conn = ScriptedConnector::full_only(vec![doc("a", "alpha")]);
    let src = source(conn);
    let result = h.engine.run(&src, None).await.unwrap();

    let ext = &result.changes[0].external_id;
    let id = chunk_id(&src.owner, SourceType::Generic, ext, 0);
    assert!(id.starts_with("team_platform_generic_"));
    let indexed = h.indexer.get(&id).unwrap();
    assert_eq!(indexed.text, "alpha");
    assert_eq!(indexed.metadata["team_id"], "platform");
    assert_eq!(indexed.metadata["title"], "a");
    assert_eq!(indexed.metadata["chunk_index"], 0);
    assert_eq!(indexed.metadata["total_chunks"], 1);
    assert_eq!(indexed.metadata["chunk_type"], "default");
}
