//! Bitbucket Cloud connector.
//!
//! Mirrors the README of every repository in a workspace. The first of
//! `README.md`, `README.rst`, `README.txt`, `README` found on the main
//! branch becomes the repository's document.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::debug;

use docmirror_core::connector::{Connector, FetchPage, SyncCursor};
use docmirror_core::error::ConnectorError;
use docmirror_core::models::{RawDocument, SourceType};

use crate::connector_fs::language_for;
use crate::http::{newest_cursor, parse_remote_ts, resume_point, str_at, ApiClient};

pub const DEFAULT_API_URL: &str = "https://api.bitbucket.org/2.0";
const README_CANDIDATES: &[&str] = &["README.md", "README.rst", "README.txt", "README"];

/// Repository fields the connector needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoInfo {
    pub slug: String,
    pub name: String,
    pub html_url: String,
    pub main_branch: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RepoInfo {
    pub fn from_json(repo: &Value) -> Option<Self> {
        let name = str_at(repo, "/name")?.to_string();
        let slug = str_at(repo, "/slug").unwrap_or(&name).to_string();
        Some(Self {
            html_url: str_at(repo, "/links/html/href").unwrap_or("").to_string(),
            main_branch: str_at(repo, "/mainbranch/name").unwrap_or("main").to_string(),
            created_at: str_at(repo, "/created_on").and_then(parse_remote_ts),
            updated_at: str_at(repo, "/updated_on").and_then(parse_remote_ts),
            slug,
            name,
        })
    }

    /// Build the document for `file` in this repository.
    pub fn readme_document(&self, workspace: &str, file: &str, content: String) -> RawDocument {
        let url = format!("{}/src/{}/{}", self.html_url, self.main_branch, file);
        let mut doc = RawDocument::new(format!("{} - {}", self.name, file), content).with_url(url);
        doc.file_path = Some(file.to_string());
        doc.language = language_for(std::path::Path::new(file)).map(str::to_string);
        doc.created_at = self.created_at;
        doc.updated_at = self.updated_at;
        doc.metadata.insert("workspace".to_string(), json!(workspace));
        doc.metadata.insert("repository".to_string(), json!(self.name));
        doc.metadata.insert("branch".to_string(), json!(self.main_branch));
        doc
    }
}

pub struct BitbucketConnector {
    name: String,
    workspace: String,
    client: Option<ApiClient>,
}

impl BitbucketConnector {
    pub fn new(name: &str, workspace: &str, client: Option<ApiClient>) -> Self {
        Self {
            name: name.to_string(),
            workspace: workspace.to_string(),
            client,
        }
    }

    fn client(&self) -> Result<&ApiClient, ConnectorError> {
        self.client
            .as_ref()
            .ok_or_else(|| ConnectorError::NotConfigured(self.name.clone()))
    }

    async fn list_repos(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RepoInfo>, ConnectorError> {
        let client = self.client()?;
        let mut query = vec![("pagelen", "100".to_string())];
        if let Some(since) = since {
            query.push((
                "q",
                format!(
                    "updated_on>={}",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            ));
        }

        let mut repos = Vec::new();
        let mut next = Some(format!("/repositories/{}", self.workspace));
        let mut first = true;
        while let Some(path) = next.take() {
            // `next` links already carry the query string
            let page = if first {
                client.get_json(&path, &query).await?
            } else {
                client.get_json(&path, &[]).await?
            };
            first = false;

            if let Some(values) = page.get("values").and_then(Value::as_array) {
                repos.extend(values.iter().filter_map(RepoInfo::from_json));
            }
            next = str_at(&page, "/next").map(str::to_string);
        }

        if let Some(since) = since {
            repos.retain(|r| r.updated_at.map_or(true, |u| u > since));
        }
        Ok(repos)
    }

    async fn readme(&self, repo: &RepoInfo) -> Result<Option<RawDocument>, ConnectorError> {
        let client = self.client()?;
        for file in README_CANDIDATES {
            let path = format!(
                "/repositories/{}/{}/src/{}/{}",
                self.workspace, repo.slug, repo.main_branch, file
            );
            if let Some(content) = client.get_text(&path).await? {
                return Ok(Some(repo.readme_document(&self.workspace, file, content)));
            }
        }
        debug!(connector = %self.name, repo = %repo.slug, "no README found");
        Ok(None)
    }

    async fn fetch_readmes(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawDocument>, ConnectorError> {
        let mut docs = Vec::new();
        for repo in self.list_repos(since).await? {
            if let Some(doc) = self.readme(&repo).await? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl Connector for BitbucketConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Bitbucket
    }

    fn is_configured(&self) -> bool {
        self.client.is_some() && !self.workspace.is_empty()
    }

    async fn test_connection(&self) -> bool {
        match &self.client {
            Some(client) => client.probe(&format!("/workspaces/{}", self.workspace)).await,
            None => false,
        }
    }

    async fn fetch_all(&self) -> Result<Vec<RawDocument>, ConnectorError> {
        self.fetch_readmes(None).await
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn fetch_since(&self, cursor: &SyncCursor) -> Result<FetchPage, ConnectorError> {
        let since = resume_point(cursor.token.as_deref(), cursor.since);
        let documents = self.fetch_readmes(since).await?;
        let next_cursor = newest_cursor(&documents);
        Ok(FetchPage {
            documents,
            next_cursor,
        })
    }
}
