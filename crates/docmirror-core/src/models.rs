//! Core data models used throughout docmirror.
//!
//! These types describe the documents fetched from connectors, the catalog
//! rows that mirror them, the chunks handed to the indexer, and the
//! bookkeeping records written for every sync run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ParseEnumError;

/// Closed set of source kinds. Each kind selects its own chunking policy
/// (see [`crate::chunk::ChunkPolicy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Confluence,
    Jira,
    Bitbucket,
    Filesystem,
    Generic,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Confluence => "confluence",
            SourceType::Jira => "jira",
            SourceType::Bitbucket => "bitbucket",
            SourceType::Filesystem => "filesystem",
            SourceType::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confluence" => Ok(SourceType::Confluence),
            "jira" => Ok(SourceType::Jira),
            "bitbucket" => Ok(SourceType::Bitbucket),
            "filesystem" => Ok(SourceType::Filesystem),
            "generic" => Ok(SourceType::Generic),
            other => Err(ParseEnumError::new("source type", other)),
        }
    }
}

/// Who owns the mirrored documents. Used as the first segment of every
/// indexer chunk id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerScope {
    User(String),
    Team(String),
}

impl OwnerScope {
    /// Metadata key the indexer stores the owner under.
    pub fn key(&self) -> &'static str {
        match self {
            OwnerScope::User(_) => "user_id",
            OwnerScope::Team(_) => "team_id",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            OwnerScope::User(id) | OwnerScope::Team(id) => id,
        }
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerScope::User(id) => write!(f, "user_{}", id),
            OwnerScope::Team(id) => write!(f, "team_{}", id),
        }
    }
}

/// Parses `user:<id>` or `team:<id>`.
impl FromStr for OwnerScope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Ok(OwnerScope::User(id.to_string())),
            Some(("team", id)) if !id.is_empty() => Ok(OwnerScope::Team(id.to_string())),
            _ => Err(ParseEnumError::new("owner scope", s)),
        }
    }
}

/// How a source is kept fresh: by the scheduler only, or additionally by
/// provider webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Scheduled,
    EventDriven,
}

/// A single comment attached to an issue-tracker document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Raw item produced by a connector before reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub url: Option<String>,
    pub title: String,
    pub content: String,
    pub description: Option<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Explicit deletion marker. Only honored by incremental fetches.
    #[serde(default)]
    pub deleted: bool,
}

impl RawDocument {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// A deletion marker for the document living at `url`.
    pub fn tombstone(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            deleted: true,
            ..Default::default()
        }
    }
}

/// Persisted record of one external document, keyed by
/// `(source_id, external_id)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub source_id: String,
    pub external_id: String,
    pub content_hash: String,
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub last_modified_external: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
    /// Number of chunks last pushed to the indexer for this entry.
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Created => "created",
            ChangeAction::Updated => "updated",
            ChangeAction::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A change emitted by reconciliation. Created and updated changes carry
/// the fetched document so it can be chunked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChange {
    pub external_id: String,
    pub action: ChangeAction,
    pub title: String,
    pub url: Option<String>,
    #[serde(skip)]
    pub document: Option<RawDocument>,
    /// Chunk count recorded before this change, used to drop stale chunk ids.
    pub previous_chunk_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    Full,
    Incremental,
    EventDriven,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::Full => "full",
            SyncStrategy::Incremental => "incremental",
            SyncStrategy::EventDriven => "event_driven",
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SyncStrategy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SyncStrategy::Full),
            "incremental" => Ok(SyncStrategy::Incremental),
            "event_driven" | "event-driven" => Ok(SyncStrategy::EventDriven),
            other => Err(ParseEnumError::new("sync strategy", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Success | SyncStatus::Error)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "success" => Ok(SyncStatus::Success),
            "error" => Ok(SyncStatus::Error),
            other => Err(ParseEnumError::new("sync status", other)),
        }
    }
}

/// Document counters shared by [`SyncRun`] and [`SyncResult`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub processed: u64,
    pub added: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// One row of the append-only sync log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRun {
    pub id: String,
    pub source_id: String,
    pub strategy: SyncStrategy,
    pub status: SyncStatus,
    pub counts: SyncCounts,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub next_cursor: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn pending(source_id: &str, strategy: SyncStrategy, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            strategy,
            status: SyncStatus::Pending,
            counts: SyncCounts::default(),
            started_at: now,
            completed_at: None,
            error_message: None,
            next_cursor: None,
            next_run_at: None,
        }
    }

    pub fn succeed(
        &mut self,
        counts: SyncCounts,
        next_cursor: Option<String>,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.status = SyncStatus::Success;
        self.counts = counts;
        self.next_cursor = next_cursor;
        self.next_run_at = Some(next_run_at);
        self.completed_at = Some(now);
    }

    pub fn fail(
        &mut self,
        counts: SyncCounts,
        message: impl Into<String>,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.status = SyncStatus::Error;
        self.counts = counts;
        self.error_message = Some(message.into());
        self.next_run_at = next_run_at;
        self.completed_at = Some(now);
    }
}

/// Scheduling and health state of a configured source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSourceState {
    pub source_id: String,
    pub source_type: SourceType,
    /// Time of the last *successful* sync.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Time of the last successful full sweep. Drives the periodic resync.
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub last_sync_cursor: Option<String>,
    pub sync_status: SyncStatus,
    pub sync_message: Option<String>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub document_count: u64,
}

impl DataSourceState {
    /// State of a never-synced source, due immediately.
    pub fn new(source_id: &str, source_type: SourceType, now: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.to_string(),
            source_type,
            last_sync_at: None,
            last_full_sync_at: None,
            last_sync_cursor: None,
            sync_status: SyncStatus::Pending,
            sync_message: None,
            next_sync_at: Some(now),
            document_count: 0,
        }
    }
}

/// Outcome of a successful [`crate::sync::SyncEngine::run`].
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub run_id: String,
    pub source_id: String,
    /// Strategy actually executed (a requested incremental run may fall
    /// back to full).
    pub strategy: SyncStrategy,
    pub counts: SyncCounts,
    pub index_failures: u64,
    pub next_cursor: Option<String>,
    pub next_run_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub changes: Vec<DocumentChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Section,
    SectionPart,
    Main,
    Comments,
    CommentsPart,
    CodeBlock,
    Default,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Section => "section",
            ChunkType::SectionPart => "section_part",
            ChunkType::Main => "main",
            ChunkType::Comments => "comments",
            ChunkType::CommentsPart => "comments_part",
            ChunkType::CodeBlock => "code_block",
            ChunkType::Default => "default",
        }
    }
}

/// A retrieval-sized slice of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub external_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub chunk_type: ChunkType,
    pub text: String,
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_scope_round_trip() {
        let owner: OwnerScope = "team:platform".parse().unwrap();
        assert_eq!(owner, OwnerScope::Team("platform".to_string()));
        assert_eq!(owner.to_string(), "team_platform");
        assert_eq!(owner.key(), "team_id");
        assert!("team:".parse::<OwnerScope>().is_err());
        assert!("org:1".parse::<OwnerScope>().is_err());
    }

    #[test]
    fn test_strategy_accepts_cli_spelling() {
        assert_eq!(
            "event-driven".parse::<SyncStrategy>().unwrap(),
            SyncStrategy::EventDriven
        );
        assert_eq!(SyncStrategy::EventDriven.as_str(), "event_driven");
    }

    #[test]
    fn test_unknown_source_type_rejected() {
        let err = "notion".parse::<SourceType>().unwrap_err();
        assert!(err.to_string().contains("notion"));
    }
}
