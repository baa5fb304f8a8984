//! examsync - Offline-First Examination Storage
//!
//! Local persistence and background synchronization for clinical examination
//! clients that must keep working without connectivity. Form progress is saved
//! locally first, queued, and delivered to the remote examination service when
//! the network allows.
//!
//! # Module Structure
//!
//! - **`shared`** - Configuration, error and event types
//! - **`local_db`** - `LocalStore`: checksummed records over a `StorageBackend`
//!   (in-memory or SQLite)
//! - **`offline`** - `SyncQueue`, `RetentionManager` and the `OfflineService`
//!   that owns every background task
//! - **`sync`** - `SyncEngine`, trigger scheduling, `NetworkMonitor` and the
//!   cross-context coordinator
//! - **`remote`** - `RemoteApi` trait and its HTTP client
//! - **`realtime`** - broadcast buses for application events and storage changes
//!
//! # Usage
//!
//! ```rust,no_run
//! use examsync::local_db::SqliteBackend;
//! use examsync::offline::OfflineService;
//! use examsync::realtime::StorageBus;
//! use examsync::remote::HttpRemoteApi;
//! use examsync::shared::config::OfflineConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OfflineConfig::load("examsync.toml")?.with_env_overrides()?;
//! let backend = Arc::new(SqliteBackend::open(config.database_path()).await?);
//! let remote = Arc::new(HttpRemoteApi::new(&config)?);
//!
//! let service = OfflineService::new(config, backend, remote, StorageBus::default());
//! service.init().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! All components are `Send + Sync` and share state through `Arc`, tokio locks
//! and channels. A sync pass is exclusive per context; contexts sharing one
//! storage origin coordinate only through the `StorageBus`.
//!
//! # Error Handling
//!
//! Fallible operations return [`shared::error::Result`]. Only storage quota
//! exhaustion and retry exhaustion surface to the user, as events.

/// Configuration, errors and events
pub mod shared;

/// Local record storage
pub mod local_db;

/// Sync queue, retention and service lifecycle
pub mod offline;

/// Sync engine and its triggers
pub mod sync;

/// Remote examination API
pub mod remote;

/// Event broadcasting
pub mod realtime;

pub use offline::OfflineService;
pub use shared::error::{OfflineError, Result};
