/**
 * Event Broadcasting
 *
 * Two broadcast channels live here:
 *
 * - `EventBus` carries `SyncEvent`s from the engine to the application
 * - `StorageBus` carries raw storage mutations between execution contexts
 *   that share one storage origin (one `LocalStore` per context)
 *
 * Publishing never fails: with no subscribers the message is dropped and the
 * drop is logged at debug level.
 */
use crate::shared::SyncEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel capacity for both buses
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Identity of one execution context (tab/window) sharing the storage origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application event broadcast
///
/// Cloned into every component that emits events; all clones publish into
/// the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all subscribers
    ///
    /// Returns the number of subscribers that received it (0 if none).
    pub fn publish(&self, event: SyncEvent) -> usize {
        match self.tx.send(event) {
            Ok(subscriber_count) => {
                tracing::trace!("[Realtime] Event broadcast to {} subscribers", subscriber_count);
                subscriber_count
            }
            Err(e) => {
                // No subscribers, that's okay
                tracing::debug!("[Realtime] No subscribers to receive event: {:?}", e.0);
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// A storage mutation made by one context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChange {
    /// Storage key that changed
    pub key: String,
    /// New value, `None` when removed
    pub new_value: Option<String>,
    /// Context that made the change
    pub origin: ContextId,
}

/// Storage mutation broadcast shared by every context of one storage origin
///
/// This is an in-process channel: contexts in separate OS processes sharing a
/// SQLite file are not notified.
#[derive(Debug, Clone)]
pub struct StorageBus {
    tx: broadcast::Sender<StorageChange>,
}

impl StorageBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.tx.subscribe()
    }

    pub fn publish(&self, change: StorageChange) -> usize {
        match self.tx.send(change) {
            Ok(subscriber_count) => subscriber_count,
            Err(e) => {
                tracing::trace!("[Realtime] No contexts listening for change of '{}'", e.0.key);
                0
            }
        }
    }
}

impl Default for StorageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
