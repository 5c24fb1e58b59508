//! Source connector abstraction.
//!
//! A connector adapts one external system to a uniform fetch interface.
//! The sync engine only ever sees [`Connector`] trait objects; concrete
//! implementations (filesystem, Confluence, Jira, Bitbucket) live in the
//! application crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConnectorError;
use crate::models::{RawDocument, SourceType};

/// Where an incremental fetch should resume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCursor {
    /// Time of the last successful sync.
    pub since: Option<DateTime<Utc>>,
    /// Opaque token returned by the previous fetch.
    pub token: Option<String>,
}

/// One incremental batch.
#[derive(Debug, Clone, Default)]
pub struct FetchPage {
    pub documents: Vec<RawDocument>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType;

    /// Whether every credential and parameter the connector needs is present.
    fn is_configured(&self) -> bool;

    async fn test_connection(&self) -> bool;

    /// Fetch every document currently present in the source.
    async fn fetch_all(&self) -> Result<Vec<RawDocument>, ConnectorError>;

    fn supports_incremental(&self) -> bool {
        false
    }

    /// Fetch documents changed since `cursor`. Deletions are reported as
    /// documents with `deleted = true`.
    async fn fetch_since(&self, _cursor: &SyncCursor) -> Result<FetchPage, ConnectorError> {
        Err(ConnectorError::IncrementalUnsupported)
    }
}
