//! Storage Backends
//!
//! `LocalStore` works over any [`StorageBackend`]: a flat string key space holding
//! serialized JSON values. Two implementations ship with the crate:
//!
//! - [`MemoryBackend`] - process memory, optional byte capacity
//! - [`SqliteBackend`](super::sqlite::SqliteBackend) - durable SQLite file via `sqlx`
//!
//! Size accounting counts `key.len() + value.len()` bytes per entry.

use crate::shared::error::{OfflineError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Durable key/value storage shared by the local store and the sync queue
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value; fails with `StorageQuotaExceeded` when full
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value, returning whether it existed
    async fn remove(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, in key order
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Bytes currently used by all entries
    async fn usage_bytes(&self) -> Result<u64>;

    /// Hard capacity in bytes, if the backend enforces one
    fn capacity_bytes(&self) -> Option<u64>;
}

pub(crate) fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
    capacity: Option<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that rejects writes once `capacity` bytes are in use
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity: Some(capacity),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;

        if let Some(capacity) = self.capacity {
            let used: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
            let replaced = entries.get(key).map(|old| entry_size(key, old)).unwrap_or(0);
            let available = capacity.saturating_sub(used - replaced);
            let requested = entry_size(key, value);
            if requested > available {
                return Err(OfflineError::StorageQuotaExceeded {
                    requested,
                    available,
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn usage_bytes(&self) -> Result<u64> {
        let entries = self.entries.read().await;
        Ok(entries.iter().map(|(k, v)| entry_size(k, v)).sum())
    }

    fn capacity_bytes(&self) -> Option<u64> {
        self.capacity
    }
}
