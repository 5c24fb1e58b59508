//! Downstream indexer abstraction.
//!
//! The sync engine pushes every chunk of a created or updated document via
//! [`Indexer::upsert`] and removes chunks of deleted documents (and stale
//! trailing chunks of shrunk documents) via [`Indexer::delete`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::IndexingError;
use crate::models::{OwnerScope, SourceType};

#[async_trait]
pub trait Indexer: Send + Sync {
    async fn upsert(&self, chunk_id: &str, text: &str, metadata: &Value)
        -> Result<(), IndexingError>;

    async fn delete(&self, chunk_id: &str) -> Result<(), IndexingError>;
}

/// `{owner}_{source_type}_{external_id}_chunk_{index}`.
pub fn chunk_id(
    owner: &OwnerScope,
    source_type: SourceType,
    external_id: &str,
    index: usize,
) -> String {
    format!("{}_{}_{}_chunk_{}", owner, source_type, external_id, index)
}

/// An indexed chunk as held by [`MemoryIndexer`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub text: String,
    pub metadata: Value,
}

/// Indexer backed by a map, with optional failure injection.
#[derive(Default)]
pub struct MemoryIndexer {
    chunks: Mutex<BTreeMap<String, IndexedChunk>>,
    fail_containing: Mutex<Option<String>>,
}

impl MemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every upsert whose chunk text contains `needle`.
    pub fn fail_when_text_contains(&self, needle: impl Into<String>) {
        *self.fail_containing.lock() = Some(needle.into());
    }

    pub fn get(&self, chunk_id: &str) -> Option<IndexedChunk> {
        self.chunks.lock().get(chunk_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.chunks.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }
}

#[async_trait]
impl Indexer for MemoryIndexer {
    async fn upsert(
        &self,
        chunk_id: &str,
        text: &str,
        metadata: &Value,
    ) -> Result<(), IndexingError> {
        if let Some(needle) = self.fail_containing.lock().as_deref() {
            if text.contains(needle) {
                return Err(IndexingError {
                    chunk_id: chunk_id.to_string(),
                    reason: "rejected by indexer".to_string(),
                });
            }
        }
        self.chunks.lock().insert(
            chunk_id.to_string(),
            IndexedChunk {
                text: text.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<(), IndexingError> {
        self.chunks.lock().remove(chunk_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_format() {
        let owner = OwnerScope::User("42".to_string());
        assert_eq!(
            chunk_id(&owner, SourceType::Jira, "abc", 3),
            "user_42_jira_abc_chunk_3"
        );
    }
}
