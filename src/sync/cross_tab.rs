//! # Cross-Context Coordinator
//!
//! Several contexts (tabs, windows) can share one storage origin. Each owns a
//! `LocalStore` and publishes its writes on the shared `StorageBus`. The
//! coordinator of a context listens to everyone else's writes and:
//!
//! - republishes them as `StorageChanged` events for the application
//! - reloads the in-memory queue when the `sync_queue` key was rewritten
//! - requests a (debounced) pass when that left work in the queue
//!
//! There is no cross-context lock. Two contexts may submit the same item; the
//! remote endpoints must tolerate repeated submissions.
//!
//! Queue writes are read-modify-write over the shared `sync_queue` key: each
//! mutation re-reads the persisted queue before writing it back, so a context
//! that has not reloaded yet still keeps items other contexts added. Two writes
//! racing between that read and the write remain last-write-wins; the item a
//! losing write drops stays in local storage and shows up in
//! `OfflineService::unresolved` until resubmitted or saved again.

use super::scheduler::{send_trigger, SyncTrigger};
use crate::local_db::SYNC_QUEUE_KEY;
use crate::offline::SyncQueue;
use crate::realtime::{ContextId, EventBus, StorageChange};
use crate::shared::error::Result;
use crate::shared::SyncEvent;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug)]
pub struct CrossTabCoordinator {
    context: ContextId,
    queue: Arc<SyncQueue>,
    events: EventBus,
}

impl CrossTabCoordinator {
    pub fn new(context: ContextId, queue: Arc<SyncQueue>, events: EventBus) -> Self {
        Self {
            context,
            queue,
            events,
        }
    }

    /// Follow the storage bus until it closes or the scheduler goes away
    pub async fn run(
        self,
        mut changes: broadcast::Receiver<StorageChange>,
        triggers: mpsc::Sender<SyncTrigger>,
    ) {
        loop {
            let trigger = match changes.recv().await {
                Ok(change) => self.handle(change).await,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("[CrossTab] Missed {} storage changes, reloading queue", missed);
                    self.resync().await
                }
                Err(RecvError::Closed) => break,
            };

            match trigger {
                Ok(Some(trigger)) => {
                    if !send_trigger(&triggers, trigger) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("[CrossTab] Failed to apply storage change: {}", e),
            }
        }
    }

    /// React to one change; returns the trigger to send, if any
    pub async fn handle(&self, change: StorageChange) -> Result<Option<SyncTrigger>> {
        if change.origin == self.context {
            return Ok(None);
        }

        let queue_changed = change.key == SYNC_QUEUE_KEY;
        tracing::debug!("[CrossTab] {} changed in context {}", change.key, change.origin);
        self.events.publish(SyncEvent::StorageChanged {
            key: change.key,
            new_value: change.new_value,
        });

        if queue_changed {
            self.resync().await
        } else {
            Ok(None)
        }
    }

    async fn resync(&self) -> Result<Option<SyncTrigger>> {
        let pending = self.queue.reload().await?;
        Ok((pending > 0).then_some(SyncTrigger::CrossContext))
    }
}
