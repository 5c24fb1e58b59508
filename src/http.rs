//! Shared plumbing for the HTTP connectors: an authenticated JSON client,
//! HTML-to-text conversion, remote timestamp parsing and cursor helpers.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;

use docmirror_core::error::ConnectorError;
use docmirror_core::models::RawDocument;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-over-HTTP client using basic auth (username + API token).
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, username: &str, token: &str) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ConnectorError::request)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            token: token.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` (relative to the base URL, or absolute) and decode JSON.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ConnectorError> {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        };

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.token))
            .query(query)
            .send()
            .await
            .map_err(ConnectorError::request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Http {
                status: status.as_u16(),
                url,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ConnectorError::Decode(e.to_string()))
    }

    /// GET `path` and return the body as text. `Ok(None)` on 404.
    pub async fn get_text(&self, path: &str) -> Result<Option<String>, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.token))
            .send()
            .await
            .map_err(ConnectorError::request)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ConnectorError::Http {
                status: status.as_u16(),
                url,
            });
        }
        response
            .text()
            .await
            .map(Some)
            .map_err(|e| ConnectorError::Decode(e.to_string()))
    }

    /// Whether `path` answers with a success status.
    pub async fn probe(&self, path: &str) -> bool {
        self.get_json(path, &[]).await.is_ok()
    }
}

fn block_tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|pre|blockquote)>").expect("valid regex")
    })
}

fn heading_close() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</h[1-6]>").expect("valid regex"))
}

fn heading_open() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<h([1-6])[^>]*>").expect("valid regex"))
}

fn script_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex"))
}

fn any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"))
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*(\n[ \t]*)+").expect("valid regex"))
}

/// Convert storage-format HTML to plain text. Headings become markdown
/// `#` lines so the wiki chunker can split on them.
pub fn html_to_text(html: &str) -> String {
    let text = script_blocks().replace_all(html, "");
    let text = heading_open().replace_all(&text, |caps: &regex::Captures| {
        let level = caps[1].parse::<usize>().unwrap_or(1);
        format!("\n{} ", "#".repeat(level))
    });
    let text = heading_close().replace_all(&text, "\n\n");
    let text = block_tags().replace_all(&text, "\n");
    let text = any_tag().replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    blank_runs().replace_all(&lines.join("\n"), "\n\n").trim().to_string()
}

/// Parse the timestamp formats used by Atlassian APIs (RFC 3339, or
/// `2024-01-02T10:00:00.000+0000`).
pub fn parse_remote_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Cursor for the next incremental fetch: the newest `updated_at` seen.
pub fn newest_cursor(docs: &[RawDocument]) -> Option<String> {
    docs.iter()
        .filter_map(|d| d.updated_at)
        .max()
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Resume point: the token when it parses as a timestamp, else `since`.
pub fn resume_point(
    token: Option<&str>,
    since: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    token.and_then(parse_remote_ts).or(since)
}
