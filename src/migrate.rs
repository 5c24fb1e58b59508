//! Schema migrations.
//!
//! Every statement is idempotent, so `mirror init` can be run repeatedly
//! and [`migrate_pool`] is also applied whenever the application opens the
//! database.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `data_sources` | scheduling state and claim of each source |
//! | `catalog_entries` | one row per known external document, soft-deleted |
//! | `sync_runs` | append-only log of sync runs |
//! | `chunks` | chunk index written by the SQLite indexer |
//! | `chunks_fts` | FTS5 mirror of `chunks.text` |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_sources (
            source_id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            last_sync_at TEXT,
            last_full_sync_at TEXT,
            last_sync_cursor TEXT,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            sync_message TEXT,
            next_sync_at TEXT,
            document_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before full sweeps were tracked separately
    let has_full_sync_column: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('data_sources') WHERE name = 'last_full_sync_at'",
    )
    .fetch_one(pool)
    .await?;
    if !has_full_sync_column {
        sqlx::query("ALTER TABLE data_sources ADD COLUMN last_full_sync_at TEXT")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_entries (
            source_id TEXT NOT NULL,
            external_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT,
            content TEXT NOT NULL,
            last_modified_external TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            synced_at TEXT NOT NULL,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (source_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            strategy TEXT NOT NULL,
            status TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            added INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            error_message TEXT,
            next_cursor TEXT,
            next_run_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            external_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sync_runs_source ON sync_runs(source_id, started_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_catalog_active ON catalog_entries(source_id, is_deleted)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(source_id, external_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_data_sources_due ON data_sources(next_sync_at)")
        .execute(pool)
        .await?;

    Ok(())
}
