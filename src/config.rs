//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/mirror.sqlite"
//!
//! [sources.eng-wiki]
//! type = "confluence"
//! owner = "team:platform"
//! base_url = "https://acme.atlassian.net"
//! username = "bot@acme.io"
//! token_env = "CONFLUENCE_TOKEN"
//! ```
//!
//! `[chunking]`, `[sync]`, `[logging]` and `[webhook]` are optional and
//! fall back to the defaults below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use docmirror_core::chunk::{self, WindowConfig};
use docmirror_core::models::{OwnerScope, SourceType, SyncMode};
use docmirror_core::sync::SyncPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_wiki_max")]
    pub wiki_max_words: usize,
    #[serde(default = "default_wiki_overlap")]
    pub wiki_overlap_words: usize,
    #[serde(default = "default_issue_max")]
    pub issue_max_words: usize,
    #[serde(default = "default_issue_overlap")]
    pub issue_overlap_words: usize,
    #[serde(default = "default_code_max")]
    pub code_max_words: usize,
    #[serde(default = "default_wiki_max")]
    pub default_max_words: usize,
    #[serde(default = "default_wiki_overlap")]
    pub default_overlap_words: usize,
}

fn default_wiki_max() -> usize {
    1000
}
fn default_wiki_overlap() -> usize {
    100
}
fn default_issue_max() -> usize {
    800
}
fn default_issue_overlap() -> usize {
    50
}
fn default_code_max() -> usize {
    1500
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            wiki_max_words: default_wiki_max(),
            wiki_overlap_words: default_wiki_overlap(),
            issue_max_words: default_issue_max(),
            issue_overlap_words: default_issue_overlap(),
            code_max_words: default_code_max(),
            default_max_words: default_wiki_max(),
            default_overlap_words: default_wiki_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_engine_config(&self) -> chunk::ChunkingConfig {
        chunk::ChunkingConfig {
            wiki: WindowConfig::new(self.wiki_max_words, self.wiki_overlap_words),
            issue: WindowConfig::new(self.issue_max_words, self.issue_overlap_words),
            code_max_words: self.code_max_words,
            default: WindowConfig::new(self.default_max_words, self.default_overlap_words),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_loop_retry")]
    pub loop_retry_secs: u64,
    #[serde(default = "default_full_interval")]
    pub full_interval_hours: i64,
    #[serde(default = "default_one_hour")]
    pub incremental_interval_hours: i64,
    #[serde(default = "default_one_hour")]
    pub error_backoff_hours: i64,
    #[serde(default = "default_full_resync")]
    pub full_resync_after_days: i64,
}

fn default_poll_interval() -> u64 {
    300
}
fn default_loop_retry() -> u64 {
    60
}
fn default_full_interval() -> i64 {
    24
}
fn default_one_hour() -> i64 {
    1
}
fn default_full_resync() -> i64 {
    7
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            loop_retry_secs: default_loop_retry(),
            full_interval_hours: default_full_interval(),
            incremental_interval_hours: default_one_hour(),
            error_backoff_hours: default_one_hour(),
            full_resync_after_days: default_full_resync(),
        }
    }
}

impl SyncConfig {
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            full_interval: chrono::Duration::hours(self.full_interval_hours),
            incremental_interval: chrono::Duration::hours(self.incremental_interval_hours),
            error_backoff: chrono::Duration::hours(self.error_backoff_hours),
            full_resync_after: chrono::Duration::days(self.full_resync_after_days),
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }

    pub fn loop_retry(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.loop_retry_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WebhookConfig {
    /// Environment variable holding the shared HMAC secret.
    pub secret_env: Option<String>,
}

impl WebhookConfig {
    pub fn secret(&self) -> Option<String> {
        self.secret_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub owner: String,
    #[serde(default)]
    pub mode: SyncMode,

    // Remote sources
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub token_env: Option<String>,
    pub workspace: Option<String>,
    #[serde(default)]
    pub projects: Vec<String>,

    // Local sources
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

impl SourceConfig {
    pub fn owner_scope(&self) -> Result<OwnerScope> {
        self.owner.parse().map_err(anyhow::Error::from)
    }

    /// API token read from `token_env`, if set and non-empty.
    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    config
        .chunking
        .to_engine_config()
        .validate()
        .with_context(|| "Invalid [chunking] section")?;

    let sync = &config.sync;
    if sync.poll_interval_secs == 0 || sync.loop_retry_secs == 0 {
        bail!("sync.poll_interval_secs and sync.loop_retry_secs must be > 0");
    }
    if sync.full_interval_hours <= 0
        || sync.incremental_interval_hours <= 0
        || sync.error_backoff_hours <= 0
        || sync.full_resync_after_days <= 0
    {
        bail!("sync intervals must be positive");
    }

    for (id, source) in &config.sources {
        validate_source(id, source)?;
    }

    Ok(config)
}

fn validate_source(id: &str, source: &SourceConfig) -> Result<()> {
    if id.is_empty() || id.chars().any(|c| c.is_whitespace() || c == '/') {
        bail!("Invalid source id '{}': must not contain whitespace or '/'", id);
    }
    source
        .owner_scope()
        .with_context(|| format!("sources.{}.owner must be 'user:<id>' or 'team:<id>'", id))?;

    match source.source_type {
        SourceType::Filesystem | SourceType::Generic => {
            if source.root.is_none() {
                bail!("sources.{}.root is required for {} sources", id, source.source_type);
            }
            if source.mode == SyncMode::EventDriven {
                bail!(
                    "sources.{}: {} sources cannot be event_driven (no webhooks)",
                    id,
                    source.source_type
                );
            }
        }
        SourceType::Confluence | SourceType::Jira => {
            if source.mode == SyncMode::EventDriven && source.base_url.is_none() {
                bail!("sources.{}.base_url is required for event_driven sources", id);
            }
        }
        SourceType::Bitbucket => {
            if source.workspace.is_none() {
                bail!("sources.{}.workspace is required for bitbucket sources", id);
            }
        }
    }
    Ok(())
}
