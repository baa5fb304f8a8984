//! # SQLite Backend
//!
//! Durable [`StorageBackend`] over a single SQLite table (`kv_store`). Uses WAL
//! mode so a reader in one context does not block writers in another.
//!
//! An optional byte capacity mirrors the quota a browser enforces on local
//! storage; SQLite's own `SQLITE_FULL` is also mapped to `StorageQuotaExceeded`.

use super::backend::{entry_size, StorageBackend};
use super::schema;
use crate::shared::error::{OfflineError, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed key/value storage
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    capacity: Option<u64>,
}

impl SqliteBackend {
    /// Open or create the database file
    ///
    /// Creates the parent directory if needed and initializes the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OfflineError::storage(format!("{}: {}", parent.display(), e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        tracing::info!("[LocalStore] Opened SQLite store at {}", path.display());
        Self::from_pool(pool).await
    }

    /// Private in-memory database, mainly for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let backend = Self {
            pool,
            capacity: None,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Enforce a byte capacity on top of SQLite's own limits
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize database schema and run pending migrations
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(schema::CREATE_SCHEMA_MIGRATIONS)
            .execute(&self.pool)
            .await?;

        let current_version: (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        for version in schema::pending_migrations(current_version.0) {
            self.apply_migration(version).await?;
        }
        Ok(())
    }

    async fn apply_migration(&self, version: i32) -> Result<()> {
        if version == 1 {
            sqlx::query(schema::CREATE_KV_STORE).execute(&self.pool).await?;
        }

        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        tracing::debug!("[LocalStore] Applied schema migration {}", version);
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(capacity) = self.capacity {
            let used: (i64,) = sqlx::query_as(
                "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
                 FROM kv_store WHERE key <> ?",
            )
            .bind(key)
            .fetch_one(&self.pool)
            .await?;

            let available = capacity.saturating_sub(used.0.max(0) as u64);
            let requested = entry_size(key, value);
            if requested > available {
                return Err(OfflineError::StorageQuotaExceeded {
                    requested,
                    available,
                });
            }
        }

        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM kv_store WHERE substr(key, 1, ?) = ? ORDER BY key ASC")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(OfflineError::from))
            .collect()
    }

    async fn usage_bytes(&self) -> Result<u64> {
        let used: (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) FROM kv_store",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(used.0.max(0) as u64)
    }

    fn capacity_bytes(&self) -> Option<u64> {
        self.capacity
    }
}
