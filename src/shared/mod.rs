//! Shared Module
//!
//! Types used across every component of the engine: configuration, the error
//! type and the events published to the application.

/// Application events
pub mod event;

/// Error types
pub mod error;

/// Engine configuration
pub mod config;

pub use config::{ConfigError, OfflineConfig, OfflineConfigBuilder};
pub use error::OfflineError;
pub use event::SyncEvent;
