//! # Sync Scheduler
//!
//! Turns trigger messages into sync passes.
//!
//! ## Features
//!
//! - **Debounce**: bursts of local saves (and writes seen from other contexts) run
//!   one pass after a quiet period
//! - **Coalescing**: triggers that pile up while a pass runs collapse into one
//! - **Connectivity Gate**: no pass is attempted while offline
//! - **Periodic Sync**: `run_interval` feeds an `Interval` trigger on a fixed period

use super::network_monitor::Connectivity;
use super::{PassOutcome, SyncEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Why a pass was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    /// Connectivity came back
    ConnectivityRestored,
    /// The application returned to the foreground while online
    BecameVisible,
    /// A record was saved locally
    LocalSave,
    /// Periodic timer
    Interval,
    /// Another context left work in the shared queue
    CrossContext,
    /// Requested by the application
    Manual,
}

impl SyncTrigger {
    /// Triggers that wait for the debounce window before running
    pub fn is_debounced(&self) -> bool {
        matches!(self, SyncTrigger::LocalSave | SyncTrigger::CrossContext)
    }
}

/// Trigger loop in front of the sync engine
#[derive(Debug)]
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    connectivity: watch::Receiver<Connectivity>,
    debounce: Duration,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        connectivity: watch::Receiver<Connectivity>,
        debounce: Duration,
    ) -> Self {
        Self {
            engine,
            connectivity,
            debounce,
        }
    }

    /// Consume triggers until every sender is gone
    pub async fn run(self, mut triggers: mpsc::Receiver<SyncTrigger>) {
        tracing::info!("[SyncScheduler] Started (debounce: {}ms)", self.debounce.as_millis());

        while let Some(first) = triggers.recv().await {
            let trigger = self.settle(first, &mut triggers).await;

            // Everything queued so far is served by the pass below
            while triggers.try_recv().is_ok() {}

            if !self.connectivity.borrow().online {
                tracing::debug!("[SyncScheduler] Offline, ignoring {:?} trigger", trigger);
                continue;
            }

            tracing::debug!("[SyncScheduler] Running pass for {:?} trigger", trigger);
            match self.engine.run_pass().await {
                Ok(PassOutcome::Skipped) => {
                    tracing::debug!("[SyncScheduler] Pass already in progress");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[SyncScheduler] Sync pass failed: {}", e);
                }
            }
        }

        tracing::info!("[SyncScheduler] Trigger channel closed, stopping");
    }

    /// Wait out the debounce window for debounced triggers
    ///
    /// Each further debounced trigger restarts the window; any other trigger ends it.
    async fn settle(
        &self,
        first: SyncTrigger,
        triggers: &mut mpsc::Receiver<SyncTrigger>,
    ) -> SyncTrigger {
        if !first.is_debounced() || self.debounce.is_zero() {
            return first;
        }

        let mut latest = first;
        loop {
            match tokio::time::timeout(self.debounce, triggers.recv()).await {
                Ok(Some(next)) if next.is_debounced() => latest = next,
                Ok(Some(next)) => return next,
                Ok(None) | Err(_) => return latest,
            }
        }
    }
}

/// Send an `Interval` trigger every `period`, skipping the immediate first tick
pub async fn run_interval(triggers: mpsc::Sender<SyncTrigger>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !send_trigger(&triggers, SyncTrigger::Interval) {
            break;
        }
    }
}

/// Offer a trigger without waiting; returns `false` once the scheduler is gone
pub(crate) fn send_trigger(triggers: &mpsc::Sender<SyncTrigger>, trigger: SyncTrigger) -> bool {
    match triggers.try_send(trigger) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::trace!("[SyncScheduler] Trigger backlog full, dropping {:?}", trigger);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
