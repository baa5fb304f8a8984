//! # Sync Engine
//!
//! Drains the sync queue against the remote examination API.
//!
//! ## Architecture
//!
//! - **Engine** (`SyncEngine`): one pass at a time over a queue snapshot
//! - **Scheduler** (`scheduler.rs`): turns triggers into passes, with debounce
//! - **Network Monitor** (`network_monitor.rs`): connectivity and visibility state
//! - **Cross-Context Coordinator** (`cross_tab.rs`): follows other contexts' writes
//! - **Sync State** (`sync_state.rs`): progress published on a `watch` channel
//!
//! ## Pass Semantics
//!
//! A pass works on the snapshot taken when it starts. Items are sent strictly one
//! after another, with a pacing delay between them; anything enqueued meanwhile
//! waits for the next pass. A pass started while another runs is skipped, not
//! queued. The pass succeeds when the queue is empty at the end.

pub mod cross_tab;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

pub use cross_tab::CrossTabCoordinator;
pub use network_monitor::{Connectivity, NetworkMonitor};
pub use scheduler::{SyncScheduler, SyncTrigger};
pub use sync_state::{PassReport, PassResult, SyncPhase, SyncState};

use crate::offline::queue::{FailureOutcome, SyncAction, SyncQueue, SyncQueueItem};
use crate::realtime::EventBus;
use crate::remote::RemoteApi;
use crate::shared::error::{OfflineError, Result};
use crate::shared::SyncEvent;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was already running
    Skipped,
    /// Not attempted for lack of connectivity
    Offline,
    /// The queue was empty at the end of the pass
    Succeeded(PassReport),
    /// Items remain queued for a later pass
    Failed(PassReport),
}

/// Clears the running flag when a pass ends, including on early return
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sequential queue processor
pub struct SyncEngine {
    queue: Arc<SyncQueue>,
    remote: Arc<dyn RemoteApi>,
    events: EventBus,
    pacing: Duration,
    running: AtomicBool,
    state: watch::Sender<SyncState>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("pacing", &self.pacing)
            .field("running", &self.running)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        queue: Arc<SyncQueue>,
        remote: Arc<dyn RemoteApi>,
        events: EventBus,
        pacing: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            queue,
            remote,
            events,
            pacing,
            running: AtomicBool::new(false),
            state,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Follow phase and progress changes
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Run one pass over the current queue snapshot
    pub async fn run_pass(&self) -> Result<PassOutcome> {
        let Some(_guard) = PassGuard::acquire(&self.running) else {
            tracing::debug!("[SyncEngine] Pass already running, trigger dropped");
            return Ok(PassOutcome::Skipped);
        };

        let snapshot = self.queue.dequeue_all().await;
        if snapshot.is_empty() {
            tracing::trace!("[SyncEngine] Queue empty, nothing to sync");
            return Ok(PassOutcome::Succeeded(PassReport::default()));
        }

        let total = snapshot.len();
        tracing::info!("[SyncEngine] Starting sync pass over {} items", total);
        self.state.send_modify(|state| {
            state.phase = SyncPhase::Syncing;
            state.current = 0;
            state.total = total;
        });
        self.events.publish(SyncEvent::SyncStarted);

        let mut report = PassReport::default();
        if let Err(e) = self.process(&snapshot, &mut report).await {
            tracing::error!("[SyncEngine] Sync pass aborted: {}", e);
            self.finish(PassResult::Failed(report));
            self.events.publish(SyncEvent::SyncError {
                error: e.to_string(),
            });
            return Err(e);
        }

        let remaining = self.queue.len().await;
        self.finish(if remaining == 0 {
            PassResult::Succeeded(report)
        } else {
            PassResult::Failed(report)
        });
        self.events.publish(SyncEvent::SyncCompleted {
            success_count: report.success_count,
            fail_count: report.fail_count,
        });

        if remaining == 0 {
            tracing::info!("[SyncEngine] Sync pass complete: {} items synced", report.success_count);
            Ok(PassOutcome::Succeeded(report))
        } else {
            tracing::warn!(
                "[SyncEngine] Sync pass ended with {} items pending ({} synced, {} failed)",
                remaining,
                report.success_count,
                report.fail_count
            );
            self.events.publish(SyncEvent::SyncError {
                error: format!("{} items still pending", remaining),
            });
            Ok(PassOutcome::Failed(report))
        }
    }

    /// Publish the terminal phase, then return to idle
    fn finish(&self, result: PassResult) {
        self.state.send_modify(|state| {
            state.phase = result.phase();
            state.last_result = Some(result);
            state.last_sync = Some(Utc::now());
        });
        self.state.send_modify(|state| state.phase = SyncPhase::Idle);
    }

    async fn process(&self, snapshot: &[SyncQueueItem], report: &mut PassReport) -> Result<()> {
        let total = snapshot.len();

        for (index, item) in snapshot.iter().enumerate() {
            if index > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            match self.dispatch(item).await {
                Ok(()) => {
                    self.queue.record_success(item).await?;
                    report.success_count += 1;
                }
                Err(e) => {
                    report.fail_count += 1;
                    self.handle_failure(item, &e).await?;
                }
            }

            let current = index + 1;
            self.state.send_modify(|state| state.current = current);
            self.events.publish(SyncEvent::SyncProgress { current, total });
        }

        Ok(())
    }

    async fn dispatch(&self, item: &SyncQueueItem) -> Result<()> {
        let record = &item.payload;
        tracing::debug!("[SyncEngine] Sending {} for {}", item.action.name(), item.id);

        if item.action.creates() {
            self.remote
                .create_record(&record.patient_id, &record.id, &record.examination_type)
                .await?;
        }

        match &item.action {
            SyncAction::Create | SyncAction::Update => {
                self.remote.update_record(&record.id, &record.payload).await
            }
            SyncAction::Complete { signature, .. } => {
                // The item may have replaced a pending save
                self.remote.update_record(&record.id, &record.payload).await?;
                self.remote.complete_record(&record.id, signature).await
            }
        }
    }

    async fn handle_failure(&self, item: &SyncQueueItem, error: &OfflineError) -> Result<()> {
        match self.queue.record_failure(item, error).await? {
            FailureOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                self.events.publish(SyncEvent::ResolutionRequired {
                    id: item.id.clone(),
                    attempts,
                    last_error,
                });
            }
            FailureOutcome::WillRetry { .. } | FailureOutcome::Superseded | FailureOutcome::Missing => {}
        }
        Ok(())
    }
}
