//! Local chunk index.
//!
//! [`SqliteIndexer`] is the [`Indexer`] the CLI wires into the sync
//! engine: every chunk lands in the `chunks` table and its text is
//! mirrored into the `chunks_fts` FTS5 table for downstream keyword
//! lookup.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use docmirror_core::error::IndexingError;
use docmirror_core::indexer::Indexer;

use crate::db::encode_ts;

pub struct SqliteIndexer {
    pool: SqlitePool,
}

impl SqliteIndexer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn failure(chunk_id: &str) -> impl Fn(sqlx::Error) -> IndexingError + '_ {
    move |e| IndexingError {
        chunk_id: chunk_id.to_string(),
        reason: e.to_string(),
    }
}

fn str_meta<'a>(metadata: &'a Value, key: &str) -> &'a str {
    metadata.get(key).and_then(Value::as_str).unwrap_or("")
}

#[async_trait]
impl Indexer for SqliteIndexer {
    async fn upsert(
        &self,
        chunk_id: &str,
        text: &str,
        metadata: &Value,
    ) -> Result<(), IndexingError> {
        let chunk_index = metadata
            .get("chunk_index")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let metadata_json = metadata.to_string();

        let mut tx = self.pool.begin().await.map_err(failure(chunk_id))?;

        sqlx::query(
            r#"
            INSERT INTO chunks (chunk_id, source_id, external_id, chunk_index, text,
                                metadata_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                source_id = excluded.source_id,
                external_id = excluded.external_id,
                chunk_index = excluded.chunk_index,
                text = excluded.text,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chunk_id)
        .bind(str_meta(metadata, "source_id"))
        .bind(str_meta(metadata, "external_id"))
        .bind(chunk_index)
        .bind(text)
        .bind(&metadata_json)
        .bind(encode_ts(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(failure(chunk_id))?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(failure(chunk_id))?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
            .bind(chunk_id)
            .bind(text)
            .execute(&mut *tx)
            .await
            .map_err(failure(chunk_id))?;

        tx.commit().await.map_err(failure(chunk_id))
    }

    async fn delete(&self, chunk_id: &str) -> Result<(), IndexingError> {
        let mut tx = self.pool.begin().await.map_err(failure(chunk_id))?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(failure(chunk_id))?;

        sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(failure(chunk_id))?;

        tx.commit().await.map_err(failure(chunk_id))
    }
}

/// Number of indexed chunks belonging to `source_id`.
pub async fn count_chunks(pool: &SqlitePool, source_id: &str) -> anyhow::Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE source_id = ?")
        .bind(source_id)
        .fetch_one(pool)
        .await?;
    Ok(n)
}
