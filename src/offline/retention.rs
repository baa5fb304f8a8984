//! # Retention Manager
//!
//! Background cleanup of the local store. Each pass:
//!
//! - deletes records whose `last_modified` is older than the retention window,
//!   together with their sync queue entry
//! - deletes records that fail the integrity check (reported as corrupt)
//!
//! Runs once when the service starts and then on a fixed interval.

use super::SyncQueue;
use crate::local_db::{LoadOutcome, LocalStore};
use crate::shared::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Records removed for age
    pub expired: usize,
    /// Records removed for failing the integrity check
    pub corrupt: usize,
}

impl RetentionReport {
    pub fn removed(&self) -> usize {
        self.expired + self.corrupt
    }
}

/// Age-based and integrity-based cleanup worker
#[derive(Debug)]
pub struct RetentionManager {
    store: LocalStore,
    queue: Arc<SyncQueue>,
    max_age: chrono::Duration,
}

impl RetentionManager {
    pub fn new(store: LocalStore, queue: Arc<SyncQueue>, max_age: chrono::Duration) -> Self {
        Self {
            store,
            queue,
            max_age,
        }
    }

    /// Run the cleanup loop
    pub async fn run(self: Arc<Self>, interval: Duration) {
        tracing::info!(
            "[Retention] Starting cleanup worker (interval: {}s, max age: {}d)",
            interval.as_secs(),
            self.max_age.num_days()
        );
        let mut ticker = tokio::time::interval(interval);
        // The service runs one pass itself during init
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::warn!("[Retention] Cleanup pass failed: {}", e);
            }
        }
    }

    pub async fn run_once(&self) -> Result<RetentionReport> {
        self.run_once_at(Utc::now()).await
    }

    /// One cleanup pass evaluated at `now`
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RetentionReport> {
        let cutoff = now - self.max_age;
        let mut report = RetentionReport::default();

        for id in self.store.ids().await? {
            match self.store.load_checked(&id).await? {
                LoadOutcome::Valid(record) if record.last_modified < cutoff => {
                    self.store.remove(&id).await?;
                    self.queue.remove(&id).await?;
                    report.expired += 1;
                }
                LoadOutcome::Valid(_) | LoadOutcome::Missing => {}
                LoadOutcome::Discarded => {
                    report.corrupt += 1;
                }
            }
        }

        if report.removed() > 0 {
            tracing::info!(
                "[Retention] Removed {} expired and {} corrupt records",
                report.expired,
                report.corrupt
            );
        } else {
            tracing::debug!("[Retention] Nothing to clean up");
        }
        Ok(report)
    }
}
