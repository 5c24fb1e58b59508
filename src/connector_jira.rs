//! Jira connector (REST API v2 search).
//!
//! Issues are fetched with JQL, optionally restricted to the configured
//! project keys. Comments are carried as structured [`Comment`]s for the
//! issue chunker and are also folded into `content`, so a new comment
//! changes the content hash.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use docmirror_core::connector::{Connector, FetchPage, SyncCursor};
use docmirror_core::error::ConnectorError;
use docmirror_core::models::{Comment, RawDocument, SourceType};

use crate::http::{newest_cursor, parse_remote_ts, resume_point, str_at, ApiClient};

const MAX_RESULTS: usize = 100;

pub struct JiraConnector {
    name: String,
    client: Option<ApiClient>,
    projects: Vec<String>,
}

impl JiraConnector {
    pub fn new(name: &str, client: Option<ApiClient>, projects: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            client,
            projects,
        }
    }

    fn client(&self) -> Result<&ApiClient, ConnectorError> {
        self.client
            .as_ref()
            .ok_or_else(|| ConnectorError::NotConfigured(self.name.clone()))
    }

    async fn search(&self, jql: &str) -> Result<Vec<RawDocument>, ConnectorError> {
        let client = self.client()?;
        let mut docs = Vec::new();
        let mut start_at = 0usize;
        loop {
            let query = [
                ("jql", jql.to_string()),
                ("startAt", start_at.to_string()),
                ("maxResults", MAX_RESULTS.to_string()),
                ("fields", "*all".to_string()),
            ];
            let body = client.get_json("/rest/api/2/search", &query).await?;
            let issues = body
                .get("issues")
                .and_then(Value::as_array)
                .ok_or_else(|| ConnectorError::Decode("missing 'issues' array".to_string()))?;

            docs.extend(
                issues
                    .iter()
                    .filter_map(|issue| issue_to_document(client.base_url(), issue)),
            );

            let total = body.get("total").and_then(Value::as_u64).unwrap_or(0) as usize;
            debug!(connector = %self.name, start_at, fetched = issues.len(), total, "jira page");
            start_at += issues.len();
            if issues.is_empty() || start_at >= total {
                break;
            }
        }
        Ok(docs)
    }
}

/// JQL for all issues, or those updated at or after `since`.
pub fn build_jql(projects: &[String], since: Option<DateTime<Utc>>) -> String {
    let mut clauses = Vec::new();
    if !projects.is_empty() {
        clauses.push(format!("project in ({})", projects.join(", ")));
    }
    if let Some(since) = since {
        clauses.push(format!("updated >= '{}'", since.format("%Y-%m-%d %H:%M")));
    }
    if clauses.is_empty() {
        "ORDER BY updated DESC".to_string()
    } else {
        format!("{} ORDER BY updated DESC", clauses.join(" AND "))
    }
}

/// Convert one search result. Issues with no textual content are dropped.
pub fn issue_to_document(base_url: &str, issue: &Value) -> Option<RawDocument> {
    let key = str_at(issue, "/key")?;
    let fields = issue.get("fields")?;

    let summary = str_at(fields, "/summary").unwrap_or("");
    let description = str_at(fields, "/description").unwrap_or("");
    let priority = str_at(fields, "/priority/name");
    let assignee = str_at(fields, "/assignee/displayName");
    let labels: Vec<&str> = fields
        .get("labels")
        .and_then(Value::as_array)
        .map(|ls| ls.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let comments: Vec<Comment> = fields
        .pointer("/comment/comments")
        .and_then(Value::as_array)
        .map(|cs| {
            cs.iter()
                .filter_map(|c| {
                    let body = str_at(c, "/body").filter(|b| !b.trim().is_empty())?;
                    Some(Comment {
                        author: str_at(c, "/author/displayName")
                            .unwrap_or("Unknown")
                            .to_string(),
                        body: body.to_string(),
                        created_at: str_at(c, "/created").and_then(parse_remote_ts),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let mut parts = Vec::new();
    if !summary.is_empty() {
        parts.push(format!("Summary: {}", summary));
    }
    if !description.is_empty() {
        parts.push(format!("Description: {}", description));
    }
    if let Some(priority) = priority {
        parts.push(format!("Priority: {}", priority));
    }
    if let Some(assignee) = assignee {
        parts.push(format!("Assignee: {}", assignee));
    }
    if !labels.is_empty() {
        parts.push(format!("Labels: {}", labels.join(", ")));
    }
    if parts.is_empty() {
        return None;
    }
    // Everything but the comments; the chunker indexes comments separately.
    let fields_text = parts.join("\n\n");
    for comment in &comments {
        parts.push(format!("Comment by {}: {}", comment.author, comment.body));
    }

    let url = format!("{}/browse/{}", base_url.trim_end_matches('/'), key);
    let mut doc = RawDocument::new(format!("{}: {}", key, summary), parts.join("\n\n")).with_url(url);
    doc.description = Some(fields_text);
    doc.comments = comments;
    doc.created_at = str_at(fields, "/created").and_then(parse_remote_ts);
    doc.updated_at = str_at(fields, "/updated").and_then(parse_remote_ts);

    doc.metadata.insert("issue_key".to_string(), json!(key));
    doc.metadata.insert(
        "issue_type".to_string(),
        json!(str_at(fields, "/issuetype/name").unwrap_or("")),
    );
    doc.metadata.insert(
        "status".to_string(),
        json!(str_at(fields, "/status/name").unwrap_or("")),
    );
    doc.metadata
        .insert("priority".to_string(), json!(priority.unwrap_or("None")));
    doc.metadata.insert(
        "assignee".to_string(),
        json!(assignee.unwrap_or("Unassigned")),
    );
    doc.metadata.insert("labels".to_string(), json!(labels));
    Some(doc)
}

#[async_trait]
impl Connector for JiraConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Jira
    }

    fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    async fn test_connection(&self) -> bool {
        match &self.client {
            Some(client) => client.probe("/rest/api/2/myself").await,
            None => false,
        }
    }

    async fn fetch_all(&self) -> Result<Vec<RawDocument>, ConnectorError> {
        self.search(&build_jql(&self.projects, None)).await
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn fetch_since(&self, cursor: &SyncCursor) -> Result<FetchPage, ConnectorError> {
        let since = resume_point(cursor.token.as_deref(), cursor.since);
        let documents = self.search(&build_jql(&self.projects, since)).await?;
        let next_cursor = newest_cursor(&documents);
        Ok(FetchPage {
            documents,
            next_cursor,
        })
    }
}
