//! Provider webhook payloads mapped to canonical change events.
//!
//! Each provider reports changes in its own JSON shape. [`map`] reduces a
//! payload to a [`CanonicalChange`] carrying the action, a document
//! reference, and the key used to find the configured sources it concerns
//! ([`affected_sources`]).
//!
//! | Provider | Event field | Match key |
//! |----------|-------------|-----------|
//! | confluence | `eventType` | `page._links.base` up to `/wiki` |
//! | jira | `webhookEvent` | `issue.self` up to `/rest/api/` |
//! | bitbucket | `eventKey` (`repo:refs_changed` only) | `repository.project.key` |

use serde_json::Value;

use crate::models::{ChangeAction, SourceType, SyncMode};
use crate::sync::SyncSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchKey {
    BaseUrl(String),
    Workspace(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalChange {
    pub source_type: SourceType,
    pub action: ChangeAction,
    /// Provider-side identifier: page id, issue key or repository name.
    pub document_ref: String,
    pub match_key: MatchKey,
    pub event_type: String,
}

/// Map a provider payload. Returns `None` when the event is irrelevant or
/// the payload lacks the identifying object.
pub fn map(source_type: SourceType, payload: &Value) -> Option<CanonicalChange> {
    match source_type {
        SourceType::Confluence => map_confluence(payload),
        SourceType::Jira => map_jira(payload),
        SourceType::Bitbucket => map_bitbucket(payload),
        SourceType::Filesystem | SourceType::Generic => None,
    }
}

fn str_field<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

fn non_empty_object(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
}

fn map_confluence(payload: &Value) -> Option<CanonicalChange> {
    let page = non_empty_object(payload.get("page"))?;
    let event_type = str_field(payload, "/eventType");
    let action = match event_type {
        "page_created" => ChangeAction::Created,
        "page_removed" | "page_trashed" => ChangeAction::Deleted,
        _ => ChangeAction::Updated,
    };
    let base = str_field(page, "/_links/base");
    let base = base.split("/wiki").next().unwrap_or(base);
    Some(CanonicalChange {
        source_type: SourceType::Confluence,
        action,
        document_ref: id_field(page, "id"),
        match_key: MatchKey::BaseUrl(normalize_base_url(base)),
        event_type: event_type.to_string(),
    })
}

fn map_jira(payload: &Value) -> Option<CanonicalChange> {
    let issue = non_empty_object(payload.get("issue"))?;
    let event_type = str_field(payload, "/webhookEvent");
    let action = match event_type {
        "jira:issue_created" => ChangeAction::Created,
        "jira:issue_deleted" => ChangeAction::Deleted,
        _ => ChangeAction::Updated,
    };
    let self_url = str_field(issue, "/self");
    let base = match self_url.split_once("/rest/api/") {
        Some((base, _)) => base,
        None => "",
    };
    Some(CanonicalChange {
        source_type: SourceType::Jira,
        action,
        document_ref: id_field(issue, "key"),
        match_key: MatchKey::BaseUrl(normalize_base_url(base)),
        event_type: event_type.to_string(),
    })
}

fn map_bitbucket(payload: &Value) -> Option<CanonicalChange> {
    let event_type = str_field(payload, "/eventKey");
    if event_type != "repo:refs_changed" {
        return None;
    }
    let repository = non_empty_object(payload.get("repository"))?;
    Some(CanonicalChange {
        source_type: SourceType::Bitbucket,
        action: ChangeAction::Updated,
        document_ref: id_field(repository, "name"),
        match_key: MatchKey::Workspace(str_field(repository, "/project/key").to_string()),
        event_type: event_type.to_string(),
    })
}

/// Ids arrive as strings or numbers depending on the provider.
fn id_field(object: &Value, key: &str) -> String {
    match object.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Trailing slashes removed, lowercased.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

/// Event-driven sources of the change's type whose connection parameters
/// match its key. An empty key matches nothing.
pub fn affected_sources<'a>(change: &CanonicalChange, sources: &'a [SyncSource]) -> Vec<&'a SyncSource> {
    sources
        .iter()
        .filter(|s| s.mode == SyncMode::EventDriven && s.source_type == change.source_type)
        .filter(|s| match &change.match_key {
            MatchKey::BaseUrl(url) => {
                !url.is_empty()
                    && s.params
                        .base_url
                        .as_deref()
                        .is_some_and(|b| normalize_base_url(b) == *url)
            }
            MatchKey::Workspace(ws) => {
                !ws.is_empty()
                    && s.params
                        .workspace
                        .as_deref()
                        .is_some_and(|w| w.eq_ignore_ascii_case(ws))
            }
        })
        .collect()
}
