//! Application wiring: one SQLite pool shared by the catalog store, the
//! sync ledger and the chunk index, plus the engine and configured sources.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use docmirror_core::chunk::ChunkingEngine;
use docmirror_core::sync::{SyncEngine, SyncSource};

use crate::config::Config;
use crate::db;
use crate::index::SqliteIndexer;
use crate::migrate::migrate_pool;
use crate::sources::build_sources;
use crate::sqlite_store::SqliteStore;

pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub engine: Arc<SyncEngine>,
    pub sources: Vec<SyncSource>,
}

impl App {
    /// Connect, apply migrations and build every configured source.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate_pool(&pool)
            .await
            .with_context(|| "Failed to apply migrations")?;

        let sources = build_sources(&config)?;
        let chunker = ChunkingEngine::new(config.chunking.to_engine_config())?;

        let store = Arc::new(SqliteStore::new(pool.clone()));
        let indexer = Arc::new(SqliteIndexer::new(pool.clone()));
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            store.clone(),
            indexer,
            chunker,
            config.sync.policy(),
        ));

        Ok(Self {
            config,
            pool,
            store,
            engine,
            sources,
        })
    }

    pub fn source(&self, id: &str) -> Option<&SyncSource> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Like [`source`](Self::source), with an error listing the known ids.
    pub fn require_source(&self, id: &str) -> Result<&SyncSource> {
        self.source(id).ok_or_else(|| {
            let known: Vec<&str> = self.sources.iter().map(|s| s.id.as_str()).collect();
            anyhow::anyhow!(
                "Unknown source '{}'. Configured sources: {}",
                id,
                if known.is_empty() {
                    "(none)".to_string()
                } else {
                    known.join(", ")
                }
            )
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
