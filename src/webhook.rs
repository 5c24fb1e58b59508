//! Webhook intake.
//!
//! [`WebhookHandler::handle`] takes a raw provider payload, checks its
//! HMAC-SHA256 signature when a secret is configured, maps it to a
//! canonical change and runs an event-driven sync for every source it
//! concerns.
//!
//! Signatures use the `sha256=<hex>` form over the raw request body.
//! Any other scheme is rejected.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info, warn};

use docmirror_core::error::SyncError;
use docmirror_core::models::{SourceType, SyncStrategy};
use docmirror_core::sync::{SyncEngine, SyncSource};
use docmirror_core::webhook::{self, affected_sources};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Nothing was synced.
    Ignored { reason: String },
    /// Ids of the sources that were synced, and of those whose sync failed.
    Processed {
        affected: Vec<String>,
        failed: Vec<String>,
    },
}

/// Check a `sha256=<hex>` signature of `body` against `secret`.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some((scheme, digest)) = signature.trim().split_once('=') else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("sha256") {
        return false;
    }
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// `sha256=<hex>` signature of `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub struct WebhookHandler {
    engine: Arc<SyncEngine>,
    sources: Vec<SyncSource>,
    secret: Option<String>,
}

impl WebhookHandler {
    pub fn new(engine: Arc<SyncEngine>, sources: Vec<SyncSource>, secret: Option<String>) -> Self {
        Self {
            engine,
            sources,
            secret,
        }
    }

    pub async fn handle(
        &self,
        provider: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome> {
        let source_type: SourceType = provider
            .parse()
            .with_context(|| format!("Unknown webhook provider '{}'", provider))?;
        if matches!(source_type, SourceType::Filesystem | SourceType::Generic) {
            bail!("{} sources do not receive webhooks", source_type);
        }

        if let Some(secret) = &self.secret {
            let Some(signature) = signature else {
                bail!("Missing webhook signature");
            };
            if !verify_signature(secret, body, signature) {
                bail!("Invalid webhook signature");
            }
        }

        let payload: serde_json::Value =
            serde_json::from_slice(body).with_context(|| "Webhook payload is not valid JSON")?;

        let Some(change) = webhook::map(source_type, &payload) else {
            debug!(provider, "webhook event ignored");
            return Ok(WebhookOutcome::Ignored {
                reason: "event not relevant".to_string(),
            });
        };

        let targets = affected_sources(&change, &self.sources);
        if targets.is_empty() {
            info!(
                provider,
                event = %change.event_type,
                document = %change.document_ref,
                "webhook matched no event-driven source"
            );
            return Ok(WebhookOutcome::Ignored {
                reason: "no matching event-driven source".to_string(),
            });
        }

        let mut affected = Vec::new();
        let mut failed = Vec::new();
        for source in targets {
            affected.push(source.id.clone());
            match self.engine.run(source, Some(SyncStrategy::EventDriven)).await {
                Ok(result) => info!(
                    source_id = %source.id,
                    event = %change.event_type,
                    action = %change.action,
                    processed = result.counts.processed,
                    "webhook sync finished"
                ),
                Err(SyncError::AlreadyRunning(_)) => {
                    // The running sync is incremental and picks the change up.
                    debug!(source_id = %source.id, "webhook sync skipped, source busy");
                }
                Err(e) => {
                    warn!(source_id = %source.id, error = %e, "webhook sync failed");
                    failed.push(source.id.clone());
                }
            }
        }

        Ok(WebhookOutcome::Processed { affected, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::json;

    use docmirror_core::chunk::{ChunkingConfig, ChunkingEngine};
    use docmirror_core::connector::{Connector, FetchPage, SyncCursor};
    use docmirror_core::error::ConnectorError;
    use docmirror_core::indexer::MemoryIndexer;
    use docmirror_core::models::{OwnerScope, RawDocument, SyncMode};
    use docmirror_core::store::memory::MemoryStore;
    use docmirror_core::store::SyncLedger;
    use docmirror_core::sync::{ConnectionParams, SyncPolicy};

    struct OnePage;

    #[async_trait]
    impl Connector for OnePage {
        fn name(&self) -> &str {
            "one-page"
        }
        fn source_type(&self) -> SourceType {
            SourceType::Confluence
        }
        fn is_configured(&self) -> bool {
            true
        }
        async fn test_connection(&self) -> bool {
            true
        }
        async fn fetch_all(&self) -> Result<Vec<RawDocument>, ConnectorError> {
            Ok(vec![RawDocument::new("Runbook", "Restart the service.")
                .with_url("https://acme.atlassian.net/wiki/x/1")])
        }
        fn supports_incremental(&self) -> bool {
            true
        }
        async fn fetch_since(&self, _cursor: &SyncCursor) -> Result<FetchPage, ConnectorError> {
            Ok(FetchPage {
                documents: self.fetch_all().await?,
                next_cursor: None,
            })
        }
    }

    fn source(id: &str, mode: SyncMode, base_url: &str) -> SyncSource {
        SyncSource {
            id: id.to_string(),
            source_type: SourceType::Confluence,
            owner: OwnerScope::Team("docs".to_string()),
            mode,
            params: ConnectionParams {
                base_url: Some(base_url.to_string()),
                workspace: None,
            },
            connector: Arc::new(OnePage),
        }
    }

    fn handler(secret: Option<&str>) -> (WebhookHandler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            store.clone(),
            Arc::new(MemoryIndexer::new()),
            ChunkingEngine::new(ChunkingConfig::default()).unwrap(),
            SyncPolicy::default(),
        ));
        let sources = vec![
            source("wiki", SyncMode::EventDriven, "https://ACME.atlassian.net/"),
            source("wiki-polled", SyncMode::Scheduled, "https://acme.atlassian.net"),
            source("other", SyncMode::EventDriven, "https://other.atlassian.net"),
        ];
        (
            WebhookHandler::new(engine, sources, secret.map(str::to_string)),
            store,
        )
    }

    fn page_event() -> Vec<u8> {
        json!({
            "eventType": "page_updated",
            "page": {"id": 1, "_links": {"base": "https://acme.atlassian.net/wiki"}}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_signature_round_trip_and_rejections() {
        let body = b"{\"a\":1}";
        let sig = sign("s3cret", body);
        assert!(sig.starts_with("sha256="));
        assert!(verify_signature("s3cret", body, &sig));
        assert!(!verify_signature("other", body, &sig));
        assert!(!verify_signature("s3cret", b"{\"a\":2}", &sig));
        assert!(!verify_signature("s3cret", body, "sha1=abcdef"));
        assert!(!verify_signature("s3cret", body, "sha256=zz"));
        assert!(!verify_signature("s3cret", body, "garbage"));
    }

    #[tokio::test]
    async fn test_event_syncs_only_matching_event_driven_source() {
        let (handler, store) = handler(None);
        let outcome = handler.handle("confluence", &page_event(), None).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Processed {
                affected: vec!["wiki".to_string()],
                failed: vec![],
            }
        );

        let runs = store.runs("wiki", 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(store.runs("wiki-polled", 10).await.unwrap().is_empty());
        assert!(store.runs("other", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_irrelevant_and_unmatched_events_are_ignored() {
        let (handler, _) = handler(None);
        let push = json!({"eventKey": "pullrequest:created", "repository": {"name": "r"}});
        let outcome = handler
            .handle("bitbucket", push.to_string().as_bytes(), None)
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));

        let elsewhere = json!({
            "eventType": "page_created",
            "page": {"id": 2, "_links": {"base": "https://nobody.atlassian.net/wiki"}}
        });
        let outcome = handler
            .handle("confluence", elsewhere.to_string().as_bytes(), None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                reason: "no matching event-driven source".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_secret_requires_valid_signature() {
        let (handler, _) = handler(Some("s3cret"));
        let body = page_event();
        assert!(handler.handle("confluence", &body, None).await.is_err());
        assert!(handler
            .handle("confluence", &body, Some("sha256=00"))
            .await
            .is_err());

        let sig = sign("s3cret", &body);
        let outcome = handler.handle("confluence", &body, Some(&sig)).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Processed { .. }));
    }

    #[tokio::test]
    async fn test_unknown_provider_and_bad_json() {
        let (handler, _) = handler(None);
        assert!(handler.handle("gitlab", b"{}", None).await.is_err());
        assert!(handler.handle("filesystem", b"{}", None).await.is_err());
        assert!(handler.handle("jira", b"not json", None).await.is_err());
    }
}
