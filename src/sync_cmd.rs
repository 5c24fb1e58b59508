//! Command implementations for `mirror sync`, `trigger`, `runs`,
//! `schedule`, `webhook` and `chunk`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use docmirror_core::chunk::{word_count, ChunkingEngine};
use docmirror_core::hash::external_id;
use docmirror_core::models::{RawDocument, SourceType, SyncResult, SyncStrategy};
use docmirror_core::store::SyncLedger;
use docmirror_core::sync::SyncSource;

use crate::app::App;
use crate::config::Config;
use crate::connector_fs::language_for;
use crate::scheduler::{self, Scheduler};
use crate::webhook::{WebhookHandler, WebhookOutcome};

/// Sync one source, or every source when `target` is `all`.
pub async fn run_sync(app: &App, target: &str, strategy: Option<SyncStrategy>) -> Result<()> {
    let selected: Vec<&SyncSource> = if target == "all" {
        app.sources.iter().collect()
    } else {
        vec![app.require_source(target)?]
    };

    if selected.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    let mut failures = Vec::new();
    for source in &selected {
        match app.engine.run(source, strategy).await {
            Ok(result) => print_result(&result),
            Err(e) => {
                println!("sync {}", source.id);
                println!("  error: {}", e);
                failures.push((source.id.clone(), e));
            }
        }
    }

    match failures.len() {
        0 => {
            println!("ok");
            Ok(())
        }
        1 if selected.len() == 1 => {
            let (id, e) = failures.remove(0);
            Err(anyhow::Error::from(e).context(format!("Sync of '{}' failed", id)))
        }
        n => bail!("{} of {} sources failed to sync", n, selected.len()),
    }
}

fn print_result(result: &SyncResult) {
    println!("sync {} ({})", result.source_id, result.strategy);
    println!("  processed: {}", result.counts.processed);
    println!("  added: {}", result.counts.added);
    println!("  updated: {}", result.counts.updated);
    println!("  deleted: {}", result.counts.deleted);
    if result.index_failures > 0 {
        println!("  index failures: {}", result.index_failures);
    }
    if let Some(cursor) = &result.next_cursor {
        println!("  cursor: {}", cursor);
    }
    println!(
        "  next run: {}",
        result.next_run_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  elapsed: {:.2}s", result.elapsed.as_secs_f64());
}

/// Schedule a source to run now, or in `in_minutes`.
pub async fn trigger(app: &App, source_id: &str, in_minutes: Option<i64>) -> Result<()> {
    let source = app.require_source(source_id)?;
    let now = Utc::now();
    app.store
        .ensure_source(&source.id, source.source_type, now)
        .await?;

    let ledger: &dyn SyncLedger = app.store.as_ref();
    match in_minutes {
        Some(minutes) if minutes > 0 => {
            scheduler::schedule_in(ledger, &source.id, minutes, now).await?;
            println!("Scheduled {} in {} minutes.", source.id, minutes);
        }
        Some(minutes) if minutes < 0 => bail!("--in-minutes must not be negative"),
        _ => {
            scheduler::schedule_immediate(ledger, &source.id, now).await?;
            println!("Scheduled {} for the next scheduler tick.", source.id);
        }
    }
    Ok(())
}

/// Print the most recent sync runs of a source.
pub async fn show_runs(app: &App, source_id: &str, limit: usize) -> Result<()> {
    let source = app.require_source(source_id)?;
    let runs = app.store.runs(&source.id, limit).await?;
    if runs.is_empty() {
        println!("No sync runs recorded for {}.", source.id);
        return Ok(());
    }

    println!(
        "{:<20} {:<13} {:<8} {:>9} {:>6} {:>8} {:>8}  MESSAGE",
        "STARTED", "STRATEGY", "STATUS", "PROCESSED", "ADDED", "UPDATED", "DELETED"
    );
    for run in runs {
        println!(
            "{:<20} {:<13} {:<8} {:>9} {:>6} {:>8} {:>8}  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.strategy,
            run.status,
            run.counts.processed,
            run.counts.added,
            run.counts.updated,
            run.counts.deleted,
            run.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Run the scheduler until Ctrl-C.
pub async fn run_scheduler(app: &App) -> Result<()> {
    let scheduler = Scheduler::new(
        app.engine.clone(),
        app.sources.clone(),
        app.config.sync.poll_interval(),
        app.config.sync.loop_retry(),
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_token.cancel();
        }
    });

    println!(
        "Scheduler running for {} sources (Ctrl-C to stop).",
        app.sources.len()
    );
    scheduler.run(shutdown).await;
    Ok(())
}

/// Feed a saved webhook payload through the webhook handler.
pub async fn run_webhook(
    app: &App,
    provider: &str,
    payload_path: &Path,
    signature: Option<&str>,
) -> Result<()> {
    let body = std::fs::read(payload_path)
        .with_context(|| format!("Failed to read payload: {}", payload_path.display()))?;

    let handler = WebhookHandler::new(
        app.engine.clone(),
        app.sources.clone(),
        app.config.webhook.secret(),
    );

    match handler.handle(provider, &body, signature).await? {
        WebhookOutcome::Ignored { reason } => println!("ignored: {}", reason),
        WebhookOutcome::Processed { affected, failed } => {
            println!("processed: {}", affected.join(", "));
            if !failed.is_empty() {
                bail!("Webhook sync failed for: {}", failed.join(", "));
            }
        }
    }
    Ok(())
}

/// Chunk a local file with the policy of `source_type` and print the result.
pub fn preview_chunks(config: &Config, path: &Path, source_type: SourceType) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut doc = RawDocument::new(title, content).with_url(format!("file://{}", path.display()));
    doc.file_path = Some(path.display().to_string());
    doc.language = language_for(path).map(str::to_string);

    let engine = ChunkingEngine::new(config.chunking.to_engine_config())?;
    let chunks = engine.chunk(&doc, &external_id(&doc), source_type);

    println!(
        "{} ({} policy): {} words, {} chunks",
        path.display(),
        source_type,
        word_count(&doc.content),
        chunks.len()
    );
    for chunk in &chunks {
        let heading = chunk
            .metadata
            .get("heading")
            .and_then(|v| v.as_str())
            .map(|h| format!(" [{}]", h))
            .unwrap_or_default();
        let preview: String = chunk.text.chars().take(72).collect();
        println!(
            "  #{:<3} {:<12} {:>5} words{}  {}",
            chunk.chunk_index,
            chunk.chunk_type.as_str(),
            word_count(&chunk.text),
            heading,
            preview.replace('\n', " ")
        );
    }
    Ok(())
}
