//! Filesystem connector.
//!
//! Walks a local directory, filtered by include/exclude globs, and turns
//! every matching file into a [`RawDocument`] with a `file://` URL.
//! `.git`, `target` and `node_modules` are always excluded.
//!
//! Incremental fetches return files whose modification time is newer than
//! the cursor. A deleted file cannot be observed that way, so deletions
//! are only picked up by the next full sweep.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::json;
use tracing::debug;
use walkdir::WalkDir;

use docmirror_core::connector::{Connector, FetchPage, SyncCursor};
use docmirror_core::error::ConnectorError;
use docmirror_core::models::{RawDocument, SourceType};

use crate::http::{newest_cursor, resume_point};

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Clone)]
pub struct FilesystemConnector {
    name: String,
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl FilesystemConnector {
    pub fn new(
        name: &str,
        root: &Path,
        include_globs: &[String],
        exclude_globs: &[String],
        follow_symlinks: bool,
    ) -> Result<Self, globset::Error> {
        let include = build_globset(include_globs.iter().map(String::as_str))?;
        let exclude = build_globset(
            DEFAULT_EXCLUDES
                .iter()
                .copied()
                .chain(exclude_globs.iter().map(String::as_str)),
        )?;
        Ok(Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            include,
            exclude,
            follow_symlinks,
        })
    }

    /// Blocking walk. Files modified at or before `newer_than` are skipped.
    fn scan(&self, newer_than: Option<DateTime<Utc>>) -> Result<Vec<RawDocument>, ConnectorError> {
        if !self.root.is_dir() {
            return Err(ConnectorError::NotConfigured(format!(
                "root does not exist: {}",
                self.root.display()
            )));
        }

        let mut docs = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(self.follow_symlinks) {
            let entry = entry.map_err(|e| ConnectorError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            let modified = modified_at(path)?;
            if let (Some(threshold), Some(modified)) = (newer_than, modified) {
                if modified <= threshold {
                    continue;
                }
            }

            match file_to_document(path, &rel_str, modified) {
                Some(doc) => docs.push(doc),
                None => debug!(path = %path.display(), "skipping non-UTF-8 file"),
            }
        }

        // Sort for deterministic ordering
        docs.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(docs)
    }

    async fn scan_blocking(
        &self,
        newer_than: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawDocument>, ConnectorError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.scan(newer_than))
            .await
            .map_err(ConnectorError::request)?
    }
}

fn modified_at(path: &Path) -> Result<Option<DateTime<Utc>>, ConnectorError> {
    let metadata = std::fs::metadata(path)?;
    Ok(metadata
        .modified()
        .ok()
        .filter(|t| *t > SystemTime::UNIX_EPOCH)
        .map(DateTime::<Utc>::from))
}

fn file_to_document(
    path: &Path,
    relative_path: &str,
    modified: Option<DateTime<Utc>>,
) -> Option<RawDocument> {
    let bytes = std::fs::read(path).ok()?;
    let body = String::from_utf8(bytes).ok()?;

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut doc = RawDocument::new(title, body).with_url(format!("file://{}", path.display()));
    doc.file_path = Some(relative_path.to_string());
    doc.language = language_for(path).map(str::to_string);
    doc.updated_at = modified;
    doc.metadata
        .insert("relative_path".to_string(), json!(relative_path));
    Some(doc)
}

/// Language name for source files, by extension.
pub fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "cs" => "csharp",
        "md" => "markdown",
        _ => return None,
    };
    Some(language)
}

fn build_globset<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Filesystem
    }

    fn is_configured(&self) -> bool {
        !self.root.as_os_str().is_empty()
    }

    async fn test_connection(&self) -> bool {
        self.root.is_dir()
    }

    async fn fetch_all(&self) -> Result<Vec<RawDocument>, ConnectorError> {
        self.scan_blocking(None).await
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn fetch_since(&self, cursor: &SyncCursor) -> Result<FetchPage, ConnectorError> {
        let threshold = resume_point(cursor.token.as_deref(), cursor.since);
        let documents = self.scan_blocking(threshold).await?;
        let next_cursor = newest_cursor(&documents);
        Ok(FetchPage {
            documents,
            next_cursor,
        })
    }
}
