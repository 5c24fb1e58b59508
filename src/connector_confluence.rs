//! Confluence connector (REST content API).
//!
//! A full fetch pages through every page of every space visible to the
//! configured account. Incremental fetches run a CQL query on
//! `lastModified`; pages that come back with status `trashed` are reported
//! as deletion markers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use docmirror_core::connector::{Connector, FetchPage, SyncCursor};
use docmirror_core::error::ConnectorError;
use docmirror_core::models::{RawDocument, SourceType};

use crate::http::{html_to_text, newest_cursor, parse_remote_ts, resume_point, str_at, ApiClient};

const PAGE_SIZE: usize = 50;
const EXPAND: &str = "body.storage,version,history,space";

pub struct ConfluenceConnector {
    name: String,
    client: Option<ApiClient>,
}

impl ConfluenceConnector {
    /// `client` is `None` when the base URL or credentials are missing.
    pub fn new(name: &str, client: Option<ApiClient>) -> Self {
        Self {
            name: name.to_string(),
            client,
        }
    }

    fn client(&self) -> Result<&ApiClient, ConnectorError> {
        self.client
            .as_ref()
            .ok_or_else(|| ConnectorError::NotConfigured(self.name.clone()))
    }

    async fn collect(&self, path: &str, extra: &[(&str, String)]) -> Result<Vec<RawDocument>, ConnectorError> {
        let client = self.client()?;
        let mut docs = Vec::new();
        let mut start = 0usize;
        loop {
            let mut query: Vec<(&str, String)> = extra.to_vec();
            query.push(("expand", EXPAND.to_string()));
            query.push(("start", start.to_string()));
            query.push(("limit", PAGE_SIZE.to_string()));

            let body = client.get_json(path, &query).await?;
            let results = body
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| ConnectorError::Decode("missing 'results' array".to_string()))?;

            for page in results {
                if page.get("type").and_then(Value::as_str) != Some("page") {
                    continue;
                }
                if let Some(doc) = page_to_document(client.base_url(), page) {
                    docs.push(doc);
                }
            }

            debug!(connector = %self.name, start, fetched = results.len(), "confluence page");
            if results.len() < PAGE_SIZE || body.pointer("/_links/next").is_none() {
                break;
            }
            start += results.len();
        }
        Ok(docs)
    }
}

/// Convert one content API result. Live pages with no text are dropped.
pub fn page_to_document(base_url: &str, page: &Value) -> Option<RawDocument> {
    let webui = str_at(page, "/_links/webui")?;
    let url = format!("{}/wiki{}", base_url.trim_end_matches('/'), webui);

    if page.get("status").and_then(Value::as_str) == Some("trashed") {
        return Some(RawDocument::tombstone(url));
    }

    let html = str_at(page, "/body/storage/value").unwrap_or("");
    let content = html_to_text(html);
    if content.is_empty() {
        return None;
    }

    let title = str_at(page, "/title").unwrap_or("Untitled");
    let mut doc = RawDocument::new(title, content).with_url(url);
    doc.created_at = str_at(page, "/history/createdDate").and_then(parse_remote_ts);
    doc.updated_at = str_at(page, "/version/when").and_then(parse_remote_ts);
    if let Some(id) = str_at(page, "/id") {
        doc.metadata.insert("page_id".to_string(), json!(id));
    }
    if let Some(space) = str_at(page, "/space/key") {
        doc.metadata.insert("space".to_string(), json!(space));
    }
    if let Some(version) = page.pointer("/version/number").and_then(Value::as_i64) {
        doc.metadata.insert("version".to_string(), json!(version));
    }
    Some(doc)
}

/// CQL for pages modified at or after `since`.
pub fn modified_since_cql(since: DateTime<Utc>) -> String {
    format!(
        "type = page and lastModified >= '{}' order by lastModified",
        since.format("%Y-%m-%d %H:%M")
    )
}

#[async_trait]
impl Connector for ConfluenceConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Confluence
    }

    fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    async fn test_connection(&self) -> bool {
        match &self.client {
            Some(client) => client.probe("/wiki/rest/api/space?limit=1").await,
            None => false,
        }
    }

    async fn fetch_all(&self) -> Result<Vec<RawDocument>, ConnectorError> {
        self.collect("/wiki/rest/api/content", &[("type", "page".to_string())])
            .await
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn fetch_since(&self, cursor: &SyncCursor) -> Result<FetchPage, ConnectorError> {
        let Some(since) = resume_point(cursor.token.as_deref(), cursor.since) else {
            let documents = self.fetch_all().await?;
            let next_cursor = newest_cursor(&documents);
            return Ok(FetchPage {
                documents,
                next_cursor,
            });
        };

        let cql = modified_since_cql(since);
        let documents = self
            .collect("/wiki/rest/api/content/search", &[("cql", cql)])
            .await?;
        let next_cursor = newest_cursor(&documents);
        Ok(FetchPage {
            documents,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_page() -> Value {
        json!({
            "id": "123",
            "type": "page",
            "status": "current",
            "title": "Runbook",
            "space": {"key": "OPS"},
            "body": {"storage": {"value": "<h1>Deploy</h1><p>Run the script.</p>"}},
            "version": {"number": 4, "when": "2024-05-01T12:30:00.000Z"},
            "history": {"createdDate": "2024-01-01T08:00:00.000Z"},
            "_links": {"webui": "/spaces/OPS/pages/123/Runbook"}
        })
    }

    #[test]
    fn test_page_to_document() {
        let doc = page_to_document("https://acme.atlassian.net/", &sample_page()).unwrap();
        assert_eq!(doc.title, "Runbook");
        assert_eq!(
            doc.url.as_deref(),
            Some("https://acme.atlassian.net/wiki/spaces/OPS/pages/123/Runbook")
        );
        assert_eq!(doc.content, "# Deploy\n\nRun the script.");
        assert_eq!(
            doc.updated_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap())
        );
        assert_eq!(doc.metadata["space"], json!("OPS"));
        assert_eq!(doc.metadata["version"], json!(4));
        assert!(!doc.deleted);
    }

    #[test]
    fn test_trashed_page_is_tombstone_and_empty_page_dropped() {
        let mut page = sample_page();
        page["status"] = json!("trashed");
        let doc = page_to_document("https://acme.atlassian.net", &page).unwrap();
        assert!(doc.deleted);

        let mut empty = sample_page();
        empty["body"]["storage"]["value"] = json!("<p> </p>");
        assert!(page_to_document("https://acme.atlassian.net", &empty).is_none());
    }

    #[test]
    fn test_modified_since_cql() {
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 9, 5, 0).unwrap();
        assert_eq!(
            modified_since_cql(since),
            "type = page and lastModified >= '2024-05-01 09:05' order by lastModified"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_connector() {
        let conn = ConfluenceConnector::new("wiki", None);
        assert!(!conn.is_configured());
        assert!(!conn.test_connection().await);
        assert!(matches!(
            conn.fetch_all().await,
            Err(ConnectorError::NotConfigured(_))
        ));
    }
}
