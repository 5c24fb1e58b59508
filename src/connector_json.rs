//! Generic connector: reads a JSON array of documents from a file.
//!
//! Each element deserializes as a [`RawDocument`] (`title`, `content` and
//! optionally `url`, `description`, `comments`, `metadata`, ...). This is
//! the escape hatch for systems without a dedicated connector: export to
//! JSON, point a `generic` source at the file.

use std::path::PathBuf;

use async_trait::async_trait;

use docmirror_core::connector::Connector;
use docmirror_core::error::ConnectorError;
use docmirror_core::models::{RawDocument, SourceType};

pub struct JsonFileConnector {
    name: String,
    path: PathBuf,
}

impl JsonFileConnector {
    pub fn new(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            path,
        }
    }
}

#[async_trait]
impl Connector for JsonFileConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Generic
    }

    fn is_configured(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    async fn test_connection(&self) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn fetch_all(&self) -> Result<Vec<RawDocument>, ConnectorError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let docs: Vec<RawDocument> = serde_json::from_str(&raw)
            .map_err(|e| ConnectorError::Decode(format!("{}: {}", self.path.display(), e)))?;
        // Deletion markers only make sense for incremental fetches.
        Ok(docs.into_iter().filter(|d| !d.deleted).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_document_array() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("docs.json");
        std::fs::write(
            &path,
            r#"[
                {"title": "One", "content": "first", "url": "https://x/1"},
                {"title": "Two", "content": "second",
                 "comments": [{"author": "a", "body": "b", "created_at": null}]}
            ]"#,
        )
        .unwrap();

        let conn = JsonFileConnector::new("export", path);
        assert!(conn.test_connection().await);
        let docs = conn.fetch_all().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].url.as_deref(), Some("https://x/1"));
        assert_eq!(docs[1].comments.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_file_is_decode_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("docs.json");
        std::fs::write(&path, "{not json").unwrap();
        let conn = JsonFileConnector::new("export", path);
        assert!(matches!(
            conn.fetch_all().await,
            Err(ConnectorError::Decode(_))
        ));
    }
}
