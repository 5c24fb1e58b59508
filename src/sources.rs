//! Source registry: builds a connector for every `[sources.<id>]` entry
//! and renders the `mirror sources` table.

use std::sync::Arc;

use anyhow::{Context, Result};

use docmirror_core::connector::Connector;
use docmirror_core::models::{SourceType, SyncMode};
use docmirror_core::store::SyncLedger;
use docmirror_core::sync::{ConnectionParams, SyncSource};

use crate::app::App;
use crate::config::{Config, SourceConfig};
use crate::connector_bitbucket::{self, BitbucketConnector};
use crate::connector_confluence::ConfluenceConnector;
use crate::connector_fs::FilesystemConnector;
use crate::connector_jira::JiraConnector;
use crate::connector_json::JsonFileConnector;
use crate::http::ApiClient;
use crate::index::count_chunks;

/// One [`SyncSource`] per configured source, in id order.
///
/// Remote sources with missing credentials are still built; their
/// connector reports `is_configured() == false` and syncs fail with a
/// configuration error until the credentials are supplied.
pub fn build_sources(config: &Config) -> Result<Vec<SyncSource>> {
    config
        .sources
        .iter()
        .map(|(id, source)| build_source(id, source))
        .collect()
}

fn build_source(id: &str, source: &SourceConfig) -> Result<SyncSource> {
    let connector: Arc<dyn Connector> = match source.source_type {
        SourceType::Filesystem => {
            let root = source.root.clone().unwrap_or_default();
            Arc::new(
                FilesystemConnector::new(
                    id,
                    &root,
                    &source.include_globs,
                    &source.exclude_globs,
                    source.follow_symlinks,
                )
                .with_context(|| format!("sources.{}: invalid glob", id))?,
            )
        }
        SourceType::Generic => Arc::new(JsonFileConnector::new(
            id,
            source.root.clone().unwrap_or_default(),
        )),
        SourceType::Confluence => Arc::new(ConfluenceConnector::new(
            id,
            api_client(id, source, source.base_url.as_deref())?,
        )),
        SourceType::Jira => Arc::new(JiraConnector::new(
            id,
            api_client(id, source, source.base_url.as_deref())?,
            source.projects.clone(),
        )),
        SourceType::Bitbucket => {
            let api = source
                .base_url
                .as_deref()
                .unwrap_or(connector_bitbucket::DEFAULT_API_URL);
            Arc::new(BitbucketConnector::new(
                id,
                source.workspace.as_deref().unwrap_or(""),
                api_client(id, source, Some(api))?,
            ))
        }
    };

    Ok(SyncSource {
        id: id.to_string(),
        source_type: source.source_type,
        owner: source.owner_scope()?,
        mode: source.mode,
        params: ConnectionParams {
            base_url: source.base_url.clone(),
            workspace: source.workspace.clone(),
        },
        connector,
    })
}

/// A client when base URL, username and token are all present.
fn api_client(id: &str, source: &SourceConfig, base_url: Option<&str>) -> Result<Option<ApiClient>> {
    let (Some(base_url), Some(username), Some(token)) =
        (base_url, source.username.as_deref(), source.token())
    else {
        return Ok(None);
    };
    let client = ApiClient::new(base_url, username, &token)
        .with_context(|| format!("sources.{}: could not build HTTP client", id))?;
    Ok(Some(client))
}

/// Print every configured source with its scheduling state.
pub async fn list_sources(app: &App) -> Result<()> {
    println!(
        "{:<20} {:<12} {:<16} {:<10} {:<10} {:>6} {:>7}  NEXT SYNC",
        "SOURCE", "TYPE", "OWNER", "MODE", "STATUS", "DOCS", "CHUNKS"
    );

    for source in &app.sources {
        let state = app.store.source_state(&source.id).await?;
        let chunks = count_chunks(&app.pool, &source.id).await?;

        let status = if !source.connector.is_configured() {
            "unconfigured".to_string()
        } else {
            state
                .as_ref()
                .map(|s| s.sync_status.to_string())
                .unwrap_or_else(|| "new".to_string())
        };
        let docs = state.as_ref().map(|s| s.document_count).unwrap_or(0);
        let next = state
            .as_ref()
            .and_then(|s| s.next_sync_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let mode = match source.mode {
            SyncMode::Scheduled => "scheduled",
            SyncMode::EventDriven => "event",
        };

        println!(
            "{:<20} {:<12} {:<16} {:<10} {:<10} {:>6} {:>7}  {}",
            source.id,
            source.source_type.as_str(),
            source.owner.to_string(),
            mode,
            status,
            docs,
            chunks,
            next
        );
    }

    if app.sources.is_empty() {
        println!("(no sources configured)");
    }
    Ok(())
}
