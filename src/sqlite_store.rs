//! SQLite-backed [`CatalogStore`] and [`SyncLedger`].
//!
//! Maps each trait operation onto the schema created by
//! [`crate::migrate`]. Reconciliation batches are written in one
//! transaction, and the per-source claim is a conditional `UPDATE` whose
//! affected-row count decides the winner.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docmirror_core::error::StoreError;
use docmirror_core::models::{
    CatalogEntry, DataSourceState, SourceType, SyncCounts, SyncRun, SyncStatus, SyncStrategy,
};
use docmirror_core::store::{CatalogStore, SyncLedger, INTERRUPTED_MESSAGE};

use crate::db::{decode_ts, encode_ts};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(StoreError::backend)
}

fn get_ts(
    row: &SqliteRow,
    table: &'static str,
    column: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    match get::<Option<String>>(row, column)? {
        None => Ok(None),
        Some(raw) => decode_ts(&raw).map(Some).ok_or_else(|| StoreError::Corrupt {
            table,
            reason: format!("invalid timestamp in {}: '{}'", column, raw),
        }),
    }
}

fn get_required_ts(
    row: &SqliteRow,
    table: &'static str,
    column: &str,
) -> Result<DateTime<Utc>, StoreError> {
    get_ts(row, table, column)?.ok_or_else(|| StoreError::Corrupt {
        table,
        reason: format!("missing {}", column),
    })
}

fn get_enum<T: FromStr>(
    row: &SqliteRow,
    table: &'static str,
    column: &str,
) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    let raw: String = get(row, column)?;
    raw.parse().map_err(|e: T::Err| StoreError::Corrupt {
        table,
        reason: e.to_string(),
    })
}

fn count(row: &SqliteRow, column: &str) -> Result<u64, StoreError> {
    Ok(get::<i64>(row, column)?.max(0) as u64)
}

fn row_to_entry(row: &SqliteRow) -> Result<CatalogEntry, StoreError> {
    const TABLE: &str = "catalog_entries";
    let metadata_json: String = get(row, "metadata_json")?;
    let metadata = serde_json::from_str(&metadata_json).map_err(|e| StoreError::Corrupt {
        table: TABLE,
        reason: format!("metadata_json: {}", e),
    })?;
    Ok(CatalogEntry {
        source_id: get(row, "source_id")?,
        external_id: get(row, "external_id")?,
        content_hash: get(row, "content_hash")?,
        title: get(row, "title")?,
        url: get(row, "url")?,
        content: get(row, "content")?,
        last_modified_external: get_ts(row, TABLE, "last_modified_external")?,
        metadata,
        is_deleted: get(row, "is_deleted")?,
        deleted_at: get_ts(row, TABLE, "deleted_at")?,
        synced_at: get_required_ts(row, TABLE, "synced_at")?,
        chunk_count: count(row, "chunk_count")? as usize,
    })
}

fn row_to_state(row: &SqliteRow) -> Result<DataSourceState, StoreError> {
    const TABLE: &str = "data_sources";
    Ok(DataSourceState {
        source_id: get(row, "source_id")?,
        source_type: get_enum::<SourceType>(row, TABLE, "source_type")?,
        last_sync_at: get_ts(row, TABLE, "last_sync_at")?,
        last_full_sync_at: get_ts(row, TABLE, "last_full_sync_at")?,
        last_sync_cursor: get(row, "last_sync_cursor")?,
        sync_status: get_enum::<SyncStatus>(row, TABLE, "sync_status")?,
        sync_message: get(row, "sync_message")?,
        next_sync_at: get_ts(row, TABLE, "next_sync_at")?,
        document_count: count(row, "document_count")?,
    })
}

fn row_to_run(row: &SqliteRow) -> Result<SyncRun, StoreError> {
    const TABLE: &str = "sync_runs";
    Ok(SyncRun {
        id: get(row, "id")?,
        source_id: get(row, "source_id")?,
        strategy: get_enum::<SyncStrategy>(row, TABLE, "strategy")?,
        status: get_enum::<SyncStatus>(row, TABLE, "status")?,
        counts: SyncCounts {
            processed: count(row, "processed")?,
            added: count(row, "added")?,
            updated: count(row, "updated")?,
            deleted: count(row, "deleted")?,
        },
        started_at: get_required_ts(row, TABLE, "started_at")?,
        completed_at: get_ts(row, TABLE, "completed_at")?,
        error_message: get(row, "error_message")?,
        next_cursor: get(row, "next_cursor")?,
        next_run_at: get_ts(row, TABLE, "next_run_at")?,
    })
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn entries(&self, source_id: &str) -> Result<Vec<CatalogEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM catalog_entries WHERE source_id = ? ORDER BY external_id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn get(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<CatalogEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM catalog_entries WHERE source_id = ? AND external_id = ?",
        )
        .bind(source_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn commit(&self, source_id: &str, batch: &[CatalogEntry]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        for entry in batch {
            let metadata_json =
                serde_json::to_string(&entry.metadata).map_err(StoreError::backend)?;
            sqlx::query(
                r#"
                INSERT INTO catalog_entries (source_id, external_id, content_hash, title, url,
                                             content, last_modified_external, metadata_json,
                                             is_deleted, deleted_at, synced_at, chunk_count)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_id, external_id) DO UPDATE SET
                    content_hash = excluded.content_hash,
                    title = excluded.title,
                    url = excluded.url,
                    content = excluded.content,
                    last_modified_external = excluded.last_modified_external,
                    metadata_json = excluded.metadata_json,
                    is_deleted = excluded.is_deleted,
                    deleted_at = excluded.deleted_at,
                    synced_at = excluded.synced_at,
                    chunk_count = excluded.chunk_count
                "#,
            )
            .bind(source_id)
            .bind(&entry.external_id)
            .bind(&entry.content_hash)
            .bind(&entry.title)
            .bind(&entry.url)
            .bind(&entry.content)
            .bind(entry.last_modified_external.map(encode_ts))
            .bind(&metadata_json)
            .bind(entry.is_deleted)
            .bind(entry.deleted_at.map(encode_ts))
            .bind(encode_ts(entry.synced_at))
            .bind(entry.chunk_count as i64)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)
    }

    async fn set_chunk_count(
        &self,
        source_id: &str,
        external_id: &str,
        chunk_count: usize,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE catalog_entries SET chunk_count = ? WHERE source_id = ? AND external_id = ?",
        )
        .bind(chunk_count as i64)
        .bind(source_id)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn active_count(&self, source_id: &str) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM catalog_entries WHERE source_id = ? AND is_deleted = 0",
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl SyncLedger for SqliteStore {
    async fn ensure_source(
        &self,
        source_id: &str,
        source_type: SourceType,
        now: DateTime<Utc>,
    ) -> Result<DataSourceState, StoreError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO data_sources (source_id, source_type, sync_status, next_sync_at)
            VALUES (?, ?, 'pending', ?)
            "#,
        )
        .bind(source_id)
        .bind(source_type.as_str())
        .bind(encode_ts(now))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        self.source_state(source_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt {
                table: "data_sources",
                reason: format!("row for '{}' vanished after insert", source_id),
            })
    }

    async fn source_state(&self, source_id: &str) -> Result<Option<DataSourceState>, StoreError> {
        let row = sqlx::query("SELECT * FROM data_sources WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.as_ref().map(row_to_state).transpose()
    }

    async fn list_sources(&self) -> Result<Vec<DataSourceState>, StoreError> {
        let rows = sqlx::query("SELECT * FROM data_sources ORDER BY source_id")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter().map(row_to_state).collect()
    }

    async fn try_claim(&self, source_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE data_sources SET sync_status = 'running' WHERE source_id = ? AND sync_status <> 'running'",
        )
        .bind(source_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn save_state(&self, state: &DataSourceState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO data_sources (source_id, source_type, last_sync_at, last_full_sync_at,
                                      last_sync_cursor, sync_status, sync_message, next_sync_at,
                                      document_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                source_type = excluded.source_type,
                last_sync_at = excluded.last_sync_at,
                last_full_sync_at = excluded.last_full_sync_at,
                last_sync_cursor = excluded.last_sync_cursor,
                sync_status = excluded.sync_status,
                sync_message = excluded.sync_message,
                next_sync_at = excluded.next_sync_at,
                document_count = excluded.document_count
            "#,
        )
        .bind(&state.source_id)
        .bind(state.source_type.as_str())
        .bind(state.last_sync_at.map(encode_ts))
        .bind(state.last_full_sync_at.map(encode_ts))
        .bind(&state.last_sync_cursor)
        .bind(state.sync_status.as_str())
        .bind(&state.sync_message)
        .bind(state.next_sync_at.map(encode_ts))
        .bind(state.document_count as i64)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn start_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, source_id, strategy, status, processed, added, updated,
                                   deleted, started_at, completed_at, error_message,
                                   next_cursor, next_run_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.source_id)
        .bind(run.strategy.as_str())
        .bind(run.status.as_str())
        .bind(run.counts.processed as i64)
        .bind(run.counts.added as i64)
        .bind(run.counts.updated as i64)
        .bind(run.counts.deleted as i64)
        .bind(encode_ts(run.started_at))
        .bind(run.completed_at.map(encode_ts))
        .bind(&run.error_message)
        .bind(&run.next_cursor)
        .bind(run.next_run_at.map(encode_ts))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn finish_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE sync_runs SET
                strategy = ?, status = ?, processed = ?, added = ?, updated = ?, deleted = ?,
                completed_at = ?, error_message = ?, next_cursor = ?, next_run_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(run.strategy.as_str())
        .bind(run.status.as_str())
        .bind(run.counts.processed as i64)
        .bind(run.counts.added as i64)
        .bind(run.counts.updated as i64)
        .bind(run.counts.deleted as i64)
        .bind(run.completed_at.map(encode_ts))
        .bind(&run.error_message)
        .bind(&run.next_cursor)
        .bind(run.next_run_at.map(encode_ts))
        .bind(&run.id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn runs(&self, source_id: &str, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM sync_runs WHERE source_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(source_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(row_to_run).collect()
    }

    async fn due_sources(&self, now: DateTime<Utc>) -> Result<Vec<DataSourceState>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM data_sources
            WHERE next_sync_at IS NOT NULL AND next_sync_at <= ? AND sync_status <> 'running'
            ORDER BY next_sync_at
            "#,
        )
        .bind(encode_ts(now))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(row_to_state).collect()
    }

    async fn set_next_sync(
        &self,
        source_id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE data_sources SET next_sync_at = ? WHERE source_id = ?")
            .bind(at.map(encode_ts))
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_interrupted(
        &self,
        now: DateTime<Utc>,
        backoff: Duration,
    ) -> Result<usize, StoreError> {
        let retry_at = encode_ts(now + backoff);
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        let sources = sqlx::query(
            r#"
            UPDATE data_sources SET sync_status = 'error', sync_message = ?, next_sync_at = ?
            WHERE sync_status = 'running'
            "#,
        )
        .bind(INTERRUPTED_MESSAGE)
        .bind(&retry_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        sqlx::query(
            r#"
            UPDATE sync_runs SET status = 'error', error_message = ?, completed_at = ?, next_run_at = ?
            WHERE status IN ('pending', 'running')
            "#,
        )
        .bind(INTERRUPTED_MESSAGE)
        .bind(encode_ts(now))
        .bind(&retry_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(sources.rows_affected() as usize)
    }
}
