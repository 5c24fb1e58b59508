//! Document catalog reconciliation.
//!
//! [`DocumentCatalog`] diffs a batch of fetched [`RawDocument`]s against the
//! persisted catalog of a source and commits the result in one
//! [`CatalogStore::commit`] call.
//!
//! | Fetched document | Catalog entry | Result |
//! |------------------|---------------|--------|
//! | present | absent | create, `created` |
//! | present | hash differs | update, `updated` |
//! | present | hash equal | no-op |
//! | present | tombstoned | restore, `updated` |
//! | absent (full sweep) | active | tombstone, `deleted` |
//! | absent (incremental) | any | no-op |
//! | deletion marker (incremental) | active | tombstone, `deleted` |
//!
//! The diff is planned entirely in memory first, so a failure before the
//! commit leaves the previous catalog untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::hash::{content_hash, external_id};
use crate::models::{CatalogEntry, ChangeAction, DocumentChange, RawDocument, SyncCounts};
use crate::store::CatalogStore;

#[derive(Debug, Clone, Default)]
pub struct ReconcileResult {
    pub created: Vec<DocumentChange>,
    pub updated: Vec<DocumentChange>,
    pub deleted: Vec<DocumentChange>,
    /// Documents examined, deletion markers included.
    pub processed: u64,
}

impl ReconcileResult {
    pub fn counts(&self) -> SyncCounts {
        SyncCounts {
            processed: self.processed,
            added: self.created.len() as u64,
            updated: self.updated.len() as u64,
            deleted: self.deleted.len() as u64,
        }
    }

    pub fn deleted_external_ids(&self) -> Vec<&str> {
        self.deleted.iter().map(|c| c.external_id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// All changes: creations, then updates, then deletions.
    pub fn into_changes(self) -> Vec<DocumentChange> {
        let mut changes = self.created;
        changes.extend(self.updated);
        changes.extend(self.deleted);
        changes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Full,
    Incremental,
}

pub struct DocumentCatalog {
    store: Arc<dyn CatalogStore>,
}

impl DocumentCatalog {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Full reconciliation: entries not present in `docs` are tombstoned.
    pub async fn reconcile(
        &self,
        source_id: &str,
        docs: Vec<RawDocument>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileResult, StoreError> {
        self.apply(source_id, docs, now, Mode::Full).await
    }

    /// Incremental reconciliation: only explicit deletion markers delete.
    pub async fn apply_incremental(
        &self,
        source_id: &str,
        docs: Vec<RawDocument>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileResult, StoreError> {
        self.apply(source_id, docs, now, Mode::Incremental).await
    }

    async fn apply(
        &self,
        source_id: &str,
        docs: Vec<RawDocument>,
        now: DateTime<Utc>,
        mode: Mode,
    ) -> Result<ReconcileResult, StoreError> {
        let existing = self.store.entries(source_id).await?;
        let (result, batch) = plan(source_id, existing, docs, mode, now);
        if !batch.is_empty() {
            self.store.commit(source_id, &batch).await?;
        }
        debug!(
            source_id,
            created = result.created.len(),
            updated = result.updated.len(),
            deleted = result.deleted.len(),
            "catalog reconciled"
        );
        Ok(result)
    }
}

/// Working state of one reconciliation.
struct Plan {
    source_id: String,
    now: DateTime<Utc>,
    entries: HashMap<String, CatalogEntry>,
    /// Chunk counts before this batch, for stale chunk cleanup.
    original_chunks: HashMap<String, usize>,
    touched: Vec<String>,
    touched_set: HashSet<String>,
    changes: Vec<DocumentChange>,
    change_index: HashMap<String, usize>,
}

impl Plan {
    fn touch(&mut self, external_id: &str) {
        if self.touched_set.insert(external_id.to_string()) {
            self.touched.push(external_id.to_string());
        }
    }

    /// Record a change, replacing an earlier change for the same document
    /// so each document yields at most one change per batch.
    fn emit(
        &mut self,
        action: ChangeAction,
        external_id: &str,
        doc: Option<RawDocument>,
        title: String,
        url: Option<String>,
    ) {
        let previous_chunk_count = self.original_chunks.get(external_id).copied().unwrap_or(0);
        match self.change_index.get(external_id) {
            Some(&i) => {
                let earlier = &mut self.changes[i];
                if action == ChangeAction::Deleted || earlier.action == ChangeAction::Deleted {
                    earlier.action = action;
                }
                earlier.title = title;
                earlier.url = url;
                earlier.document = doc;
            }
            None => {
                self.change_index
                    .insert(external_id.to_string(), self.changes.len());
                self.changes.push(DocumentChange {
                    external_id: external_id.to_string(),
                    action,
                    title,
                    url,
                    document: doc,
                    previous_chunk_count,
                });
            }
        }
    }

    fn upsert(&mut self, doc: RawDocument) {
        let ext_id = external_id(&doc);
        let hash = content_hash(&doc.content);

        let action = match self.entries.get_mut(&ext_id) {
            None => {
                let entry = CatalogEntry {
                    source_id: self.source_id.clone(),
                    external_id: ext_id.clone(),
                    content_hash: hash,
                    title: doc.title.clone(),
                    url: doc.url.clone(),
                    content: doc.content.clone(),
                    last_modified_external: doc.updated_at,
                    metadata: Value::Object(doc.metadata.clone()),
                    is_deleted: false,
                    deleted_at: None,
                    synced_at: self.now,
                    chunk_count: 0,
                };
                self.entries.insert(ext_id.clone(), entry);
                Some(ChangeAction::Created)
            }
            Some(entry) if entry.is_deleted || entry.content_hash != hash => {
                entry.content_hash = hash;
                entry.title = doc.title.clone();
                entry.url = doc.url.clone();
                entry.content = doc.content.clone();
                entry.last_modified_external = doc.updated_at;
                entry.metadata = Value::Object(doc.metadata.clone());
                entry.is_deleted = false;
                entry.deleted_at = None;
                entry.synced_at = self.now;
                Some(ChangeAction::Updated)
            }
            Some(_) => None,
        };

        match action {
            Some(action) => {
                debug!(external_id = %ext_id, action = %action, "document changed");
                self.touch(&ext_id);
                let (title, url) = (doc.title.clone(), doc.url.clone());
                self.emit(action, &ext_id, Some(doc), title, url);
            }
            None => debug!(external_id = %ext_id, "document unchanged"),
        }
    }

    fn tombstone(&mut self, ext_id: &str) {
        let Some(entry) = self.entries.get_mut(ext_id) else {
            return;
        };
        if entry.is_deleted {
            return;
        }
        entry.is_deleted = true;
        entry.deleted_at = Some(self.now);
        entry.synced_at = self.now;
        entry.chunk_count = 0;
        let (title, url) = (entry.title.clone(), entry.url.clone());
        debug!(external_id = %ext_id, "document tombstoned");
        self.touch(ext_id);
        self.emit(ChangeAction::Deleted, ext_id, None, title, url);
    }
}

fn plan(
    source_id: &str,
    existing: Vec<CatalogEntry>,
    docs: Vec<RawDocument>,
    mode: Mode,
    now: DateTime<Utc>,
) -> (ReconcileResult, Vec<CatalogEntry>) {
    let original_chunks = existing
        .iter()
        .map(|e| (e.external_id.clone(), e.chunk_count))
        .collect();
    let mut plan = Plan {
        source_id: source_id.to_string(),
        now,
        entries: existing
            .into_iter()
            .map(|e| (e.external_id.clone(), e))
            .collect(),
        original_chunks,
        touched: Vec::new(),
        touched_set: HashSet::new(),
        changes: Vec::new(),
        change_index: HashMap::new(),
    };

    let mut seen = HashSet::new();
    let mut processed = 0u64;

    for doc in docs {
        processed += 1;
        if doc.deleted {
            // Full sweeps infer deletions from absence; markers only count
            // for incremental fetches.
            if mode == Mode::Incremental {
                let ext_id = external_id(&doc);
                plan.tombstone(&ext_id);
            }
            continue;
        }
        seen.insert(external_id(&doc));
        plan.upsert(doc);
    }

    if mode == Mode::Full {
        let mut missing: Vec<String> = plan
            .entries
            .values()
            .filter(|e| !e.is_deleted && !seen.contains(&e.external_id))
            .map(|e| e.external_id.clone())
            .collect();
        missing.sort();
        for ext_id in missing {
            plan.tombstone(&ext_id);
        }
    }

    let batch: Vec<CatalogEntry> = plan
        .touched
        .iter()
        .filter_map(|id| plan.entries.get(id).cloned())
        .collect();

    let mut result = ReconcileResult {
        processed,
        ..Default::default()
    };
    for change in plan.changes {
        match change.action {
            ChangeAction::Created => result.created.push(change),
            ChangeAction::Updated => result.updated.push(change),
            ChangeAction::Deleted => result.deleted.push(change),
        }
    }
    (result, batch)
}
