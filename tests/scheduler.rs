use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use docmirror::config::parse_config;
use docmirror::connector_confluence::ConfluenceConnector;
use docmirror::connector_fs::FilesystemConnector;
use docmirror::db;
use docmirror::index::SqliteIndexer;
use docmirror::migrate::migrate_pool;
use docmirror::scheduler::{schedule_immediate, schedule_in, Scheduler, TickReport};
use docmirror::sqlite_store::SqliteStore;
use docmirror_core::chunk::{ChunkingConfig, ChunkingEngine};
use docmirror_core::connector::Connector;
use docmirror_core::error::{ConnectorError, StoreError};
use docmirror_core::indexer::MemoryIndexer;
use docmirror_core::models::{
    DataSourceState, OwnerScope, RawDocument, SourceType, SyncMode, SyncRun, SyncStatus,
    SyncStrategy,
};
use docmirror_core::store::memory::MemoryStore;
use docmirror_core::store::SyncLedger;
use docmirror_core::sync::{ConnectionParams, SyncEngine, SyncPolicy, SyncSource};

struct Fixture {
    tmp: TempDir,
    store: Arc<SqliteStore>,
    engine: Arc<SyncEngine>,
}

async fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let cfg = parse_config(&format!(
        "[db]\npath = \"{}\"\n",
        tmp.path().join("mirror.sqlite").display()
    ))
    .unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    migrate_pool(&pool).await.unwrap();

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(SqliteIndexer::new(pool)),
        ChunkingEngine::new(ChunkingConfig::default()).unwrap(),
        SyncPolicy::default(),
    ));
    Fixture { tmp, store, engine }
}

fn source(id: &str, source_type: SourceType, connector: Arc<dyn Connector>) -> SyncSource {
    SyncSource {
        id: id.to_string(),
        source_type,
        owner: OwnerScope::Team("docs".to_string()),
        mode: SyncMode::Scheduled,
        params: ConnectionParams::default(),
        connector,
    }
}

fn fs_source(fx: &Fixture, id: &str, exists: bool) -> SyncSource {
    let root = fx.tmp.path().join(id);
    if exists {
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("readme.md"), "hello from the docs").unwrap();
    }
    let connector = FilesystemConnector::new(id, &root, &["**/*.md".to_string()], &[], false).unwrap();
    source(id, SourceType::Filesystem, Arc::new(connector))
}

fn scheduler(fx: &Fixture, sources: Vec<SyncSource>) -> Scheduler {
    Scheduler::new(
        fx.engine.clone(),
        sources,
        StdDuration::from_secs(3600),
        StdDuration::from_secs(60),
    )
}

fn assert_within_a_minute(actual: Option<DateTime<Utc>>, expected: DateTime<Utc>) {
    let actual = actual.expect("next sync scheduled");
    assert!(
        actual >= expected && actual < expected + Duration::minutes(1),
        "{} not within a minute after {}",
        actual,
        expected
    );
}

struct SlowConnector;

#[async_trait]
impl Connector for SlowConnector {
    fn name(&self) -> &str {
        "slow"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Generic
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn test_connection(&self) -> bool {
        true
    }

    async fn fetch_all(&self) -> Result<Vec<RawDocument>, ConnectorError> {
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        Ok(Vec::new())
    }
}

/// Ledger whose first `due_sources` call fails. Records when each call
/// happened.
struct FlakyLedger {
    inner: MemoryStore,
    calls: Mutex<Vec<tokio::time::Instant>>,
}

impl FlakyLedger {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncLedger for FlakyLedger {
    async fn ensure_source(
        &self,
        source_id: &str,
        source_type: SourceType,
        now: DateTime<Utc>,
    ) -> Result<DataSourceState, StoreError> {
        self.inner.ensure_source(source_id, source_type, now).await
    }

    async fn source_state(&self, source_id: &str) -> Result<Option<DataSourceState>, StoreError> {
        self.inner.source_state(source_id).await
    }

    async fn list_sources(&self) -> Result<Vec<DataSourceState>, StoreError> {
        self.inner.list_sources().await
    }

    async fn try_claim(&self, source_id: &str) -> Result<bool, StoreError> {
        self.inner.try_claim(source_id).await
    }

    async fn save_state(&self, state: &DataSourceState) -> Result<(), StoreError> {
        self.inner.save_state(state).await
    }

    async fn start_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        self.inner.start_run(run).await
    }

    async fn finish_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        self.inner.finish_run(run).await
    }

    async fn runs(&self, source_id: &str, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        self.inner.runs(source_id, limit).await
    }

    async fn due_sources(&self, now: DateTime<Utc>) -> Result<Vec<DataSourceState>, StoreError> {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(tokio::time::Instant::now());
            calls.len() == 1
        };
        if first {
            return Err(StoreError::backend("database is locked"));
        }
        self.inner.due_sources(now).await
    }

    async fn set_next_sync(
        &self,
        source_id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        self.inner.set_next_sync(source_id, at).await
    }

    async fn reset_interrupted(
        &self,
        now: DateTime<Utc>,
        backoff: Duration,
    ) -> Result<usize, StoreError> {
        self.inner.reset_interrupted(now, backoff).await
    }
}

#[tokio::test]
async fn test_failing_source_does_not_stop_tick() {
    let fx = fixture().await;
    let sources = vec![
        fs_source(&fx, "broken", false),
        source(
            "wiki",
            SourceType::Confluence,
            Arc::new(ConfluenceConnector::new("wiki", None)),
        ),
        fs_source(&fx, "good", true),
    ];
    let sched = scheduler(&fx, sources);
    let now = Utc::now();

    let report = sched.tick(now, &CancellationToken::new()).await.unwrap();
    assert_eq!(
        report,
        TickReport {
            due: 3,
            succeeded: 1,
            failed: 2,
            skipped: 0,
        }
    );

    let good = fx.store.source_state("good").await.unwrap().unwrap();
    assert_eq!(good.sync_status, SyncStatus::Success);
    assert_eq!(good.document_count, 1);
    assert_within_a_minute(good.next_sync_at, now + Duration::hours(24));

    // Connector failures back off; configuration errors are not rescheduled.
    let broken = fx.store.source_state("broken").await.unwrap().unwrap();
    assert_eq!(broken.sync_status, SyncStatus::Error);
    assert_within_a_minute(broken.next_sync_at, now + Duration::hours(1));
    let wiki = fx.store.source_state("wiki").await.unwrap().unwrap();
    assert_eq!(wiki.sync_status, SyncStatus::Error);
    assert_eq!(wiki.next_sync_at, None);

    let report = sched.tick(now, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.due, 0);

    let later = sched
        .tick(now + Duration::hours(2), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(later.due, 1, "only the backed-off source is due again");
}

#[tokio::test]
async fn test_due_source_missing_from_config_is_skipped() {
    let fx = fixture().await;
    let now = Utc::now();
    fx.store
        .ensure_source("ghost", SourceType::Jira, now)
        .await
        .unwrap();

    let sched = scheduler(&fx, vec![fs_source(&fx, "good", true)]);
    let report = sched.tick(now, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.due, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);
    assert!(fx.store.runs("ghost", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_tick_starts_nothing() {
    let fx = fixture().await;
    let sched = scheduler(&fx, vec![fs_source(&fx, "good", true)]);
    let token = CancellationToken::new();
    token.cancel();

    let report = sched.tick(Utc::now(), &token).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(fx.store.runs("good", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_resets_stale_claim() {
    let fx = fixture().await;
    let now = Utc::now();
    fx.store
        .ensure_source("good", SourceType::Filesystem, now)
        .await
        .unwrap();
    assert!(fx.store.try_claim("good").await.unwrap());
    let mut run = SyncRun::pending("good", SyncStrategy::Full, now);
    run.status = SyncStatus::Running;
    fx.store.start_run(&run).await.unwrap();

    let sched = scheduler(&fx, vec![fs_source(&fx, "good", true)]);
    assert_eq!(sched.recover(now).await.unwrap(), 1);

    // Due again once the backoff has passed.
    let report = sched
        .tick(now + Duration::hours(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    let runs = fx.store.runs("good", 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].status, SyncStatus::Error);
}

#[tokio::test]
async fn test_run_loop_stops_on_cancel() {
    let fx = fixture().await;
    let sched = Arc::new(scheduler(&fx, vec![fs_source(&fx, "good", true)]));
    let token = CancellationToken::new();

    let handle = {
        let sched = sched.clone();
        let token = token.clone();
        tokio::spawn(async move { sched.run(token).await })
    };

    let mut synced = false;
    for _ in 0..100 {
        if !fx.store.runs("good", 1).await.unwrap().is_empty() {
            synced = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
    assert!(synced, "scheduler never ran the due source");

    token.cancel();
    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_manual_scheduling() {
    let fx = fixture().await;
    let now = Utc::now();
    let ledger: &dyn SyncLedger = fx.store.as_ref();

    assert!(!schedule_immediate(ledger, "good", now).await.unwrap());

    fx.store
        .ensure_source("good", SourceType::Filesystem, now)
        .await
        .unwrap();
    assert!(schedule_in(ledger, "good", 30, now).await.unwrap());
    assert!(fx.store.due_sources(now).await.unwrap().is_empty());
    assert_eq!(
        fx.store.due_sources(now + Duration::minutes(30)).await.unwrap().len(),
        1
    );

    assert!(schedule_immediate(ledger, "good", now).await.unwrap());
    assert_eq!(fx.store.due_sources(now).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_later_sources_are_stamped_with_their_own_start() {
    let fx = fixture().await;
    let now = Utc::now();
    // Due earlier, so it runs first.
    fx.store
        .ensure_source("slow", SourceType::Generic, now - Duration::minutes(1))
        .await
        .unwrap();

    let sources = vec![
        source("slow", SourceType::Generic, Arc::new(SlowConnector)),
        fs_source(&fx, "good", true),
    ];
    let report = scheduler(&fx, sources)
        .tick(now, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 2);

    let slow = fx.store.source_state("slow").await.unwrap().unwrap();
    let good = fx.store.source_state("good").await.unwrap().unwrap();
    let gap = good.last_sync_at.unwrap() - slow.last_sync_at.unwrap();
    assert!(gap >= Duration::milliseconds(300), "gap was {}", gap);
    assert!(good.next_sync_at.unwrap() - now >= Duration::hours(24) + Duration::milliseconds(300));
}

#[tokio::test(start_paused = true)]
async fn test_failed_tick_retries_after_loop_retry() {
    let ledger = Arc::new(FlakyLedger::new());
    let engine = Arc::new(SyncEngine::new(
        Arc::new(MemoryStore::new()),
        ledger.clone(),
        Arc::new(MemoryIndexer::new()),
        ChunkingEngine::new(ChunkingConfig::default()).unwrap(),
        SyncPolicy::default(),
    ));
    let sched = Arc::new(Scheduler::new(
        engine,
        Vec::new(),
        StdDuration::from_secs(3600),
        StdDuration::from_secs(60),
    ));
    let token = CancellationToken::new();
    let handle = {
        let sched = sched.clone();
        let token = token.clone();
        tokio::spawn(async move { sched.run(token).await })
    };

    tokio::time::sleep(StdDuration::from_secs(120)).await;
    let calls = ledger.calls();
    assert_eq!(calls.len(), 2, "expected the failed tick and one retry");
    assert_eq!(calls[1] - calls[0], StdDuration::from_secs(60));

    // Back on the poll interval after the retry succeeded.
    tokio::time::sleep(StdDuration::from_secs(3600)).await;
    let calls = ledger.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2] - calls[1], StdDuration::from_secs(3600));

    token.cancel();
    handle.await.unwrap();
}
