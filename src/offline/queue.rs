//! # Sync Queue
//!
//! Ordered set of pending mutations, at most one per record id, persisted under the
//! `sync_queue` storage key.
//!
//! ## Features
//!
//! - **Upsert by id**: a new save replaces the pending item for its record
//! - **Priority Support**: `high` before `normal` before `low`, older first within a level
//! - **Bounded Retries**: an item is dropped after `max_attempts` failures, or at once
//!   on a failure that cannot succeed on retry, and its record is flagged for manual
//!   resolution together with the dropped action
//! - **Shared Storage**: every mutation re-reads the persisted queue first, so items
//!   added by another context since the last reload are kept
//! - **Snapshots**: a sync pass works on an immutable copy of the queue
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn example(queue: examsync::offline::SyncQueue, record: examsync::local_db::OfflineRecord)
//! # -> examsync::shared::error::Result<()> {
//! use examsync::offline::queue::SyncQueueItem;
//!
//! queue.enqueue(SyncQueueItem::update(record)).await?;
//!
//! for item in queue.dequeue_all().await.iter() {
//!     // Submit item...
//!     queue.record_success(item).await?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::local_db::{LocalStore, OfflineRecord, SYNC_QUEUE_KEY};
use crate::shared::error::{OfflineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Remote operation an item stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncAction {
    /// Register the examination remotely, then upload its payload
    Create,
    /// Upload the latest payload
    Update,
    /// Sign off the examination
    Complete {
        /// Signature payload forwarded to the remote service
        signature: Value,
        /// Register the examination first; set when the completion replaced a
        /// creation that was never sent
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        create: bool,
    },
}

impl SyncAction {
    /// Action kept when a pending item is replaced by a newer one
    ///
    /// Neither a pending creation nor a pending completion is ever lost; the
    /// newer payload is carried either way.
    pub fn merge(pending: SyncAction, incoming: SyncAction) -> SyncAction {
        match (pending, incoming) {
            (SyncAction::Create, SyncAction::Update) => SyncAction::Create,
            (complete @ SyncAction::Complete { .. }, SyncAction::Update) => complete,
            (SyncAction::Complete { signature, .. }, SyncAction::Create) => SyncAction::Complete {
                signature,
                create: true,
            },
            (pending, SyncAction::Complete { signature, create }) => SyncAction::Complete {
                signature,
                create: create || pending.creates(),
            },
            (_, incoming) => incoming,
        }
    }

    /// Whether dispatching this action registers the examination remotely
    pub fn creates(&self) -> bool {
        match self {
            SyncAction::Create => true,
            SyncAction::Update => false,
            SyncAction::Complete { create, .. } => *create,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Complete { .. } => "complete",
        }
    }

    /// Tags this build can decode
    const KNOWN: [&'static str; 3] = ["create", "update", "complete"];
}

/// Sync priority levels, highest first
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// One pending mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Id of the record this item represents
    pub id: String,
    pub action: SyncAction,
    /// Record snapshot taken at enqueue time
    pub payload: OfflineRecord,
    /// When the item was enqueued
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub priority: Priority,
}

impl SyncQueueItem {
    /// Item for any action; completions get high priority
    pub fn new(record: OfflineRecord, action: SyncAction) -> Self {
        let priority = match action {
            SyncAction::Complete { .. } => Priority::High,
            SyncAction::Create | SyncAction::Update => Priority::Normal,
        };
        Self {
            id: record.id.clone(),
            action,
            payload: record,
            timestamp: Utc::now(),
            attempts: 0,
            last_attempt: None,
            last_error: None,
            priority,
        }
    }

    pub fn create(record: OfflineRecord) -> Self {
        Self::new(record, SyncAction::Create)
    }

    pub fn update(record: OfflineRecord) -> Self {
        Self::new(record, SyncAction::Update)
    }

    pub fn complete(record: OfflineRecord, signature: Value) -> Self {
        Self::new(
            record,
            SyncAction::Complete {
                signature,
                create: false,
            },
        )
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether `self` was replaced by `current` after being snapshotted
    fn superseded_by(&self, current: &SyncQueueItem) -> bool {
        current.payload.version != self.payload.version || current.timestamp != self.timestamp
    }
}

/// What happened to an item after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still queued for the next pass
    WillRetry { attempts: u32 },
    /// Dropped from the queue; the record now requires manual resolution
    Exhausted { attempts: u32, last_error: String },
    /// The item was replaced by a newer save during the pass and left untouched
    Superseded,
    /// The item is no longer queued
    Missing,
}

/// Persistent, ordered sync queue
#[derive(Debug)]
pub struct SyncQueue {
    store: LocalStore,
    items: Mutex<Vec<SyncQueueItem>>,
    max_attempts: u32,
}

impl SyncQueue {
    pub fn new(store: LocalStore, max_attempts: u32) -> Self {
        Self {
            store,
            items: Mutex::new(Vec::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Read the persisted queue, replacing the in-memory copy
    pub async fn load(&self) -> Result<usize> {
        let decoded = self.latest().await?;
        let count = decoded.len();
        *self.items.lock().await = decoded;
        tracing::debug!("[SyncQueue] Loaded {} pending items", count);
        Ok(count)
    }

    /// Re-read the queue after another context rewrote it
    pub async fn reload(&self) -> Result<usize> {
        self.load().await
    }

    /// Add an item, replacing any pending item for the same record
    pub async fn enqueue(&self, mut item: SyncQueueItem) -> Result<()> {
        let mut items = self.items.lock().await;
        let mut next = self.latest().await?;

        if let Some(pos) = next.iter().position(|existing| existing.id == item.id) {
            let pending = next.remove(pos);
            item.action = SyncAction::merge(pending.action, item.action);
            if matches!(item.action, SyncAction::Complete { .. }) {
                item.priority = Priority::High;
            }
            tracing::debug!("[SyncQueue] Replacing pending item {}", item.id);
        }

        next.push(item);
        sort_queue(&mut next);
        self.persist(&next).await?;
        *items = next;
        Ok(())
    }

    /// Immutable snapshot of the queue in processing order
    pub async fn dequeue_all(&self) -> Arc<[SyncQueueItem]> {
        Arc::from(self.items.lock().await.as_slice())
    }

    /// Count a failed attempt for a snapshotted item
    pub async fn record_failure(
        &self,
        snapshot: &SyncQueueItem,
        error: &OfflineError,
    ) -> Result<FailureOutcome> {
        let mut items = self.items.lock().await;
        let mut next = self.latest().await?;

        let pos = match next.iter().position(|item| item.id == snapshot.id) {
            Some(pos) => pos,
            None => {
                *items = next;
                return Ok(FailureOutcome::Missing);
            }
        };
        if snapshot.superseded_by(&next[pos]) {
            *items = next;
            return Ok(FailureOutcome::Superseded);
        }

        let item = &mut next[pos];
        item.attempts += 1;
        item.last_attempt = Some(Utc::now());
        item.last_error = Some(error.to_string());
        let attempts = item.attempts;

        if attempts < self.max_attempts && error.is_retryable() {
            self.persist(&next).await?;
            *items = next;
            tracing::info!(
                "[SyncQueue] Item {} failed (attempt {}/{}): {}",
                snapshot.id,
                attempts,
                self.max_attempts,
                error
            );
            return Ok(FailureOutcome::WillRetry { attempts });
        }

        let dropped = next.remove(pos);
        self.persist(&next).await?;
        *items = next;
        drop(items);

        let last_error = error.to_string();
        self.store
            .mark_requires_resolution(&snapshot.id, dropped.action, attempts, &last_error)
            .await?;
        tracing::warn!(
            "[SyncQueue] Item {} dropped after {} attempts; record kept for manual resolution: {}",
            snapshot.id,
            attempts,
            last_error
        );
        Ok(FailureOutcome::Exhausted {
            attempts,
            last_error,
        })
    }

    /// Remove a confirmed item and its local record
    ///
    /// Returns `false` when the item was replaced by a newer save during the
    /// pass; the newer item and record are then kept for the next pass.
    pub async fn record_success(&self, snapshot: &SyncQueueItem) -> Result<bool> {
        let mut items = self.items.lock().await;
        let mut next = self.latest().await?;

        if let Some(pos) = next.iter().position(|item| item.id == snapshot.id) {
            if snapshot.superseded_by(&next[pos]) {
                tracing::debug!("[SyncQueue] Item {} changed during sync; keeping newer version", snapshot.id);
                *items = next;
                return Ok(false);
            }
            next.remove(pos);
            self.persist(&next).await?;
        }
        *items = next;
        drop(items);

        match self.store.load(&snapshot.id).await? {
            Some(record) if record.version > snapshot.payload.version => {
                tracing::debug!("[SyncQueue] Record {} has unsynced edits; keeping it", snapshot.id);
            }
            Some(_) => {
                self.store.remove(&snapshot.id).await?;
            }
            None => {}
        }
        tracing::debug!("[SyncQueue] Item {} synced", snapshot.id);
        Ok(true)
    }

    /// Drop the item for a record without touching the record
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut items = self.items.lock().await;
        let mut next = self.latest().await?;
        let Some(pos) = next.iter().position(|item| item.id == id) else {
            *items = next;
            return Ok(false);
        };
        next.remove(pos);
        self.persist(&next).await?;
        *items = next;
        Ok(true)
    }

    /// Forget every item (the caller clears storage)
    pub async fn clear(&self) {
        self.items.lock().await.clear();
    }

    pub async fn get(&self, id: &str) -> Option<SyncQueueItem> {
        self.items.lock().await.iter().find(|item| item.id == id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.items.lock().await.iter().any(|item| item.id == id)
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Persisted queue as it is now, including other contexts' writes
    async fn latest(&self) -> Result<Vec<SyncQueueItem>> {
        Ok(match self.store.read_raw(SYNC_QUEUE_KEY).await? {
            Some(raw) => decode_queue(&raw),
            None => Vec::new(),
        })
    }

    async fn persist(&self, items: &[SyncQueueItem]) -> Result<()> {
        let value = serde_json::to_string(items)?;
        self.store.write_raw(SYNC_QUEUE_KEY, value).await
    }
}

fn sort_queue(items: &mut [SyncQueueItem]) {
    items.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
}

/// Decode a persisted queue item by item, dropping what this build cannot read
fn decode_queue(raw: &str) -> Vec<SyncQueueItem> {
    let entries: Vec<Value> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("[SyncQueue] Persisted queue is unreadable, starting empty: {}", e);
            return Vec::new();
        }
    };

    let mut items: Vec<SyncQueueItem> = entries
        .into_iter()
        .filter_map(|entry| {
            let tag = entry
                .get("action")
                .and_then(|action| action.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string);

            match serde_json::from_value::<SyncQueueItem>(entry) {
                Ok(item) => Some(item),
                Err(e) => {
                    let error = match tag {
                        Some(action) if !SyncAction::KNOWN.contains(&action.as_str()) => {
                            OfflineError::UnknownAction { action }
                        }
                        _ => OfflineError::from(e),
                    };
                    tracing::error!("[SyncQueue] Dropping persisted item: {}", error);
                    None
                }
            }
        })
        .collect();

    sort_queue(&mut items);
    items
}
