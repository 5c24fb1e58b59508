//! Error taxonomy for the sync pipeline.
//!
//! | Error | Raised by | Policy |
//! |-------|-----------|--------|
//! | [`SyncError::Configuration`] | missing/invalid credentials | not retried |
//! | [`ConnectorError`] | network/auth failures against a source | retried after backoff |
//! | [`StoreError`] | catalog or ledger writes | aborts the run, catalog stays at last commit |
//! | [`IndexingError`] | indexer pushes | logged per chunk, never fails the run |

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error for source '{source_id}': {reason}")]
    Configuration { source_id: String, reason: String },

    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("reconciliation failed: {0}")]
    Reconciliation(#[from] StoreError),

    #[error("source '{0}' is already being synced")]
    AlreadyRunning(String),
}

impl SyncError {
    /// Whether the scheduler should try this source again after the
    /// backoff delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Connector(_) | SyncError::Reconciliation(_))
    }
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector is not configured: {0}")]
    NotConfigured(String),

    #[error("incremental fetch is not supported by this connector")]
    IncrementalUnsupported,

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("request failed: {0}")]
    Request(#[source] BoxError),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    pub fn request<E: Into<BoxError>>(err: E) -> Self {
        ConnectorError::Request(err.into())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

impl StoreError {
    pub fn backend<E: Into<BoxError>>(err: E) -> Self {
        StoreError::Backend(err.into())
    }
}

#[derive(Debug, Error)]
#[error("indexing chunk '{chunk_id}' failed: {reason}")]
pub struct IndexingError {
    pub chunk_id: String,
    pub reason: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkConfigError {
    #[error("{policy}: max_words must be > 0")]
    ZeroWindow { policy: &'static str },

    #[error("{policy}: overlap_words ({overlap}) must be smaller than max_words ({max})")]
    OverlapTooLarge {
        policy: &'static str,
        max: usize,
        overlap: usize,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
