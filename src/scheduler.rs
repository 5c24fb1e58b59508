//! Background scheduler.
//!
//! Every poll interval the scheduler registers configured sources with the
//! ledger, asks it for the sources that are due, and syncs them one after
//! another. A failing source is logged and rescheduled by the engine; it
//! never stops the tick. If the tick itself fails (the ledger is
//! unreachable) the loop waits `loop_retry` instead of the poll interval.
//!
//! Shutdown goes through a [`CancellationToken`]: a sync already in flight
//! runs to completion, no new one is started.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use docmirror_core::error::{StoreError, SyncError};
use docmirror_core::store::SyncLedger;
use docmirror_core::sync::{SyncEngine, SyncSource};

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Due sources that were not run: unknown to the config, already
    /// claimed, or left behind by a shutdown.
    pub skipped: usize,
}

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    sources: Vec<SyncSource>,
    poll_interval: Duration,
    loop_retry: Duration,
}

impl Scheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        sources: Vec<SyncSource>,
        poll_interval: Duration,
        loop_retry: Duration,
    ) -> Self {
        Self {
            engine,
            sources,
            poll_interval,
            loop_retry,
        }
    }

    /// Reset claims left `running` by a previous process.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let reset = self
            .engine
            .ledger()
            .reset_interrupted(now, self.engine.policy().error_backoff)
            .await?;
        if reset > 0 {
            warn!(sources = reset, "reset interrupted syncs from a previous run");
        }
        Ok(reset)
    }

    /// Run every due source once. Each sync is stamped with `now` plus the
    /// time the tick has spent so far.
    pub async fn tick(
        &self,
        now: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> Result<TickReport, StoreError> {
        let started = Instant::now();
        let ledger = self.engine.ledger();
        for source in &self.sources {
            ledger
                .ensure_source(&source.id, source.source_type, now)
                .await?;
        }

        let due = ledger.due_sources(now).await?;
        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };
        info!(due = report.due, "scheduler tick");

        for state in due {
            if shutdown.is_cancelled() {
                report.skipped += 1;
                continue;
            }

            let Some(source) = self.sources.iter().find(|s| s.id == state.source_id) else {
                warn!(source_id = %state.source_id, "due source is not configured, skipping");
                report.skipped += 1;
                continue;
            };

            let run_at = now
                + chrono::Duration::from_std(started.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
            match self.engine.run_at(source, None, run_at).await {
                Ok(result) => {
                    report.succeeded += 1;
                    info!(
                        source_id = %source.id,
                        strategy = %result.strategy,
                        processed = result.counts.processed,
                        "scheduled sync finished"
                    );
                }
                Err(SyncError::AlreadyRunning(_)) => {
                    report.skipped += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(source_id = %source.id, error = %e, "scheduled sync failed");
                }
            }
        }

        Ok(report)
    }

    /// Loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        if let Err(e) = self.recover(Utc::now()).await {
            error!(error = %e, "could not reset interrupted syncs");
        }
        info!(
            sources = self.sources.len(),
            poll_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );

        loop {
            let wait = match self.tick(Utc::now(), &shutdown).await {
                Ok(_) => self.poll_interval,
                Err(e) => {
                    error!(error = %e, retry_secs = self.loop_retry.as_secs(), "scheduler tick failed");
                    self.loop_retry
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("scheduler stopped");
    }
}

/// Make `source_id` due now. Returns `false` when the source is unknown.
pub async fn schedule_immediate(
    ledger: &dyn SyncLedger,
    source_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let found = ledger.set_next_sync(source_id, Some(now)).await?;
    if found {
        info!(source_id, "scheduled immediate sync");
    }
    Ok(found)
}

/// Make `source_id` due `minutes` from `now`.
pub async fn schedule_in(
    ledger: &dyn SyncLedger,
    source_id: &str,
    minutes: i64,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let found = ledger
        .set_next_sync(source_id, Some(now + chrono::Duration::minutes(minutes)))
        .await?;
    if found {
        info!(source_id, minutes, "scheduled sync");
    }
    Ok(found)
}
