//! # Local Store
//!
//! Durable keyed storage for offline records with per-record integrity checking.
//!
//! ## Key Space
//!
//! - `offline_questionnaire_<id>` - one [`OfflineRecord`] per key
//! - `sync_queue` - the persisted [`SyncQueue`](crate::offline::SyncQueue)
//!
//! Both hold JSON text. Every mutation is published on the [`StorageBus`] so that
//! other contexts sharing the storage origin can follow along.
//!
//! ## Integrity
//!
//! A record whose checksum does not match its payload, or whose bytes no longer
//! parse, is deleted on read and reported as absent. Bad data is never served.
//!
//! ## Quota
//!
//! A write rejected for lack of space returns `StorageQuotaExceeded` and blocks
//! further saves until something is removed.
//!
//! ## Key Components
//!
//! - `record.rs`: record model and checksum
//! - `backend.rs`: `StorageBackend` trait and in-memory backend
//! - `sqlite.rs`: SQLite backend
//! - `schema.rs`: SQLite schema and migrations

pub mod backend;
pub mod record;
pub mod schema;
pub mod sqlite;

pub use backend::{MemoryBackend, StorageBackend};
pub use record::{Correlation, OfflineRecord, RecordMetadata, RecordSyncStatus};
pub use sqlite::SqliteBackend;

use crate::offline::queue::SyncAction;
use crate::realtime::{ContextId, StorageBus, StorageChange};
use crate::shared::error::{OfflineError, Result};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Key prefix of record entries
pub const RECORD_KEY_PREFIX: &str = "offline_questionnaire_";

/// Key of the persisted sync queue
pub const SYNC_QUEUE_KEY: &str = "sync_queue";

/// Usage percentage at which `StoreStats::near_quota` turns on
pub const QUOTA_WARNING_PERCENT: f64 = 80.0;

/// Storage key of a record id
pub fn record_key(id: &str) -> String {
    format!("{}{}", RECORD_KEY_PREFIX, id)
}

/// Result of reading one record key
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Valid(OfflineRecord),
    /// The stored bytes were corrupt and have been deleted
    Discarded,
    Missing,
}

/// Local store statistics
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    /// Number of valid records
    pub item_count: usize,
    /// Bytes used by every key of the backend
    pub total_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Entries in the persisted sync queue
    pub pending_sync_count: usize,
    /// `total_bytes` against the configured quota, in percent
    pub usage_percent: f64,
    /// Usage reached [`QUOTA_WARNING_PERCENT`]
    pub near_quota: bool,
}

#[derive(Debug)]
struct StoreInner {
    backend: Arc<dyn StorageBackend>,
    context: ContextId,
    bus: StorageBus,
    quota_bytes: u64,
    quota_blocked: AtomicBool,
}

/// Local record store
///
/// Cheap to clone; all clones share the backend and quota state.
#[derive(Debug, Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl LocalStore {
    /// Create a store for one context over a shared backend
    pub fn new(backend: Arc<dyn StorageBackend>, bus: StorageBus, quota_bytes: u64) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                context: ContextId::new(),
                bus,
                quota_bytes,
                quota_blocked: AtomicBool::new(false),
            }),
        }
    }

    pub fn context(&self) -> ContextId {
        self.inner.context
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    /// Whether saves are blocked by an earlier quota failure
    pub fn is_quota_blocked(&self) -> bool {
        self.inner.quota_blocked.load(Ordering::Acquire)
    }

    /// Save a new version of a record
    ///
    /// The first save creates version 1; later saves keep `created_at` and bump
    /// the version.
    pub async fn save(
        &self,
        id: &str,
        correlation: Correlation,
        payload: Value,
        metadata: RecordMetadata,
    ) -> Result<OfflineRecord> {
        let now = Utc::now();
        let record = match self.load(id).await? {
            Some(previous) => previous.revise(correlation, payload, metadata, now),
            None => OfflineRecord::new(id, correlation, payload, metadata, now),
        };

        self.put(&record).await?;
        tracing::debug!("[LocalStore] Saved record {} v{}", record.id, record.version);
        Ok(record)
    }

    /// Load a record, discarding it if corrupt
    pub async fn load(&self, id: &str) -> Result<Option<OfflineRecord>> {
        match self.load_checked(id).await? {
            LoadOutcome::Valid(record) => Ok(Some(record)),
            LoadOutcome::Discarded | LoadOutcome::Missing => Ok(None),
        }
    }

    /// Load a record and report whether corrupt bytes were discarded
    pub async fn load_checked(&self, id: &str) -> Result<LoadOutcome> {
        let key = record_key(id);
        let raw = match self.read_raw(&key).await? {
            Some(raw) => raw,
            None => return Ok(LoadOutcome::Missing),
        };

        match serde_json::from_str::<OfflineRecord>(&raw) {
            Ok(record) if record.id == id && record.verify() => Ok(LoadOutcome::Valid(record)),
            Ok(_) => {
                self.discard(&key, "checksum mismatch").await?;
                Ok(LoadOutcome::Discarded)
            }
            Err(e) => {
                self.discard(&key, &e.to_string()).await?;
                Ok(LoadOutcome::Discarded)
            }
        }
    }

    async fn discard(&self, key: &str, reason: &str) -> Result<()> {
        let error = OfflineError::integrity(key);
        tracing::warn!("[LocalStore] {} ({}); discarding", error, reason);
        self.remove_raw(key).await?;
        Ok(())
    }

    /// Stream the valid records whose id starts with `prefix`
    ///
    /// The key set is captured when the call is made; records are read one at a
    /// time as the stream is polled. Call again to restart the scan.
    pub async fn list(&self, prefix: &str) -> Result<BoxStream<'static, OfflineRecord>> {
        let keys = self.inner.backend.keys(&record_key(prefix)).await?;
        let store = self.clone();

        Ok(stream::iter(keys)
            .filter_map(move |key| {
                let store = store.clone();
                async move {
                    let id = key.strip_prefix(RECORD_KEY_PREFIX)?;
                    match store.load(id).await {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::warn!("[LocalStore] Skipping {} during scan: {}", key, e);
                            None
                        }
                    }
                }
            })
            .boxed())
    }

    /// Ids of every stored record key, valid or not
    pub async fn ids(&self) -> Result<Vec<String>> {
        let keys = self.inner.backend.keys(RECORD_KEY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(RECORD_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    /// Delete a record
    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.remove_raw(&record_key(id)).await
    }

    /// Flag a record whose sync retries ran out
    pub async fn mark_requires_resolution(
        &self,
        id: &str,
        action: SyncAction,
        attempts: u32,
        last_error: &str,
    ) -> Result<bool> {
        self.set_sync_status(
            id,
            RecordSyncStatus::RequiresResolution {
                action,
                attempts,
                last_error: last_error.to_string(),
            },
        )
        .await
    }

    /// Return a record to the pending state
    pub async fn mark_pending(&self, id: &str) -> Result<bool> {
        self.set_sync_status(id, RecordSyncStatus::Pending).await
    }

    async fn set_sync_status(&self, id: &str, status: RecordSyncStatus) -> Result<bool> {
        match self.load(id).await? {
            Some(mut record) => {
                record.sync_status = status;
                self.put(&record).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Aggregate statistics for quota reporting
    pub async fn stats(&self) -> Result<StoreStats> {
        let records: Vec<OfflineRecord> = self.list("").await?.collect().await;

        let total_bytes = self.inner.backend.usage_bytes().await?;
        let pending_sync_count = match self.read_raw(SYNC_QUEUE_KEY).await? {
            Some(raw) => serde_json::from_str::<Vec<serde::de::IgnoredAny>>(&raw)
                .map(|items| items.len())
                .unwrap_or(0),
            None => 0,
        };
        let usage_percent = total_bytes as f64 / self.inner.quota_bytes as f64 * 100.0;

        Ok(StoreStats {
            item_count: records.len(),
            total_bytes,
            oldest: records.iter().map(|r| r.last_modified).min(),
            newest: records.iter().map(|r| r.last_modified).max(),
            pending_sync_count,
            usage_percent,
            near_quota: usage_percent >= QUOTA_WARNING_PERCENT,
        })
    }

    /// Usage against the configured quota, in percent
    pub async fn usage_percent(&self) -> Result<f64> {
        let used = self.inner.backend.usage_bytes().await?;
        Ok(used as f64 / self.inner.quota_bytes as f64 * 100.0)
    }

    /// Every valid record, for backup or hand-over
    pub async fn export(&self) -> Result<Vec<OfflineRecord>> {
        Ok(self.list("").await?.collect().await)
    }

    /// Restore exported records, keeping their timestamps and versions
    ///
    /// Checksums are recomputed, so an edited export imports cleanly.
    pub async fn import(&self, records: Vec<OfflineRecord>) -> Result<usize> {
        let mut imported = 0;
        for record in records {
            self.put(&record.seal()).await?;
            imported += 1;
        }
        tracing::info!("[LocalStore] Imported {} records", imported);
        Ok(imported)
    }

    /// Operator action: delete every record and the sync queue
    pub async fn clear_all(&self) -> Result<usize> {
        let keys = self.inner.backend.keys(RECORD_KEY_PREFIX).await?;
        let mut removed = 0;
        for key in &keys {
            if self.remove_raw(key).await? {
                removed += 1;
            }
        }
        self.remove_raw(SYNC_QUEUE_KEY).await?;
        self.inner.quota_blocked.store(false, Ordering::Release);
        tracing::info!("[LocalStore] Cleared {} records", removed);
        Ok(removed)
    }

    async fn put(&self, record: &OfflineRecord) -> Result<()> {
        let key = record_key(&record.id);
        let value = serde_json::to_string(record)?;

        if self.is_quota_blocked() {
            let requested = backend::entry_size(&key, &value);
            let available = match self.inner.backend.capacity_bytes() {
                Some(capacity) => capacity.saturating_sub(self.inner.backend.usage_bytes().await?),
                None => 0,
            };
            return Err(OfflineError::StorageQuotaExceeded {
                requested,
                available,
            });
        }

        self.write_raw(&key, value).await
    }

    pub(crate) async fn read_raw(&self, key: &str) -> Result<Option<String>> {
        self.inner.backend.get(key).await
    }

    pub(crate) async fn write_raw(&self, key: &str, value: String) -> Result<()> {
        match self.inner.backend.set(key, &value).await {
            Ok(()) => {
                self.inner.bus.publish(StorageChange {
                    key: key.to_string(),
                    new_value: Some(value),
                    origin: self.inner.context,
                });
                Ok(())
            }
            Err(err @ OfflineError::StorageQuotaExceeded { .. }) => {
                self.inner.quota_blocked.store(true, Ordering::Release);
                tracing::warn!("[LocalStore] {}; saves blocked until space is freed", err);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) async fn remove_raw(&self, key: &str) -> Result<bool> {
        let existed = self.inner.backend.remove(key).await?;
        if existed {
            self.inner.quota_blocked.store(false, Ordering::Release);
            self.inner.bus.publish(StorageChange {
                key: key.to_string(),
                new_value: None,
                origin: self.inner.context,
            });
        }
        Ok(existed)
    }
}
