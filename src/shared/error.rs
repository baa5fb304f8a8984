//! Shared Error Types
//!
//! This module defines the error taxonomy of the offline engine. Every component
//! (local store, sync queue, sync engine, remote client) reports failures through
//! [`OfflineError`].
//!
//! # Error Categories
//!
//! - `StorageQuotaExceeded` - backing storage is full; surfaced to the operator
//! - `IntegrityCheckFailed` - a stored record failed its checksum; handled locally
//! - `NetworkError` / `ServerError` - remote failures, retried up to the configured budget
//! - `UnknownAction` - a persisted queue entry carries an action tag this build cannot decode
//!
//! # Usage
//!
//! ```rust
//! use examsync::shared::error::OfflineError;
//!
//! let error = OfflineError::server(503, "maintenance");
//! assert!(error.is_retryable());
//! ```
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Errors raised by the offline persistence and sync engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OfflineError {
    /// The backing store cannot hold the write
    #[error("Storage quota exceeded: {requested} bytes requested, {available} bytes available")]
    StorageQuotaExceeded {
        /// Size of the rejected write in bytes
        requested: u64,
        /// Remaining capacity in bytes at the time of the write
        available: u64,
    },

    /// A stored value did not match its checksum or could not be decoded
    #[error("Integrity check failed for key '{key}'")]
    IntegrityCheckFailed {
        /// Storage key of the discarded value
        key: String,
    },

    /// The remote service could not be reached
    #[error("Network error: {message}")]
    NetworkError {
        /// Human-readable error message
        message: String,
    },

    /// The remote service answered with a non-success status
    #[error("Server error ({status}): {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// A persisted queue entry uses an action outside the closed set
    #[error("Unknown sync action '{action}'")]
    UnknownAction {
        /// The unrecognised action tag
        action: String,
    },

    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },

    /// Backend storage failure other than quota exhaustion
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message
        message: String,
    },

    /// No record exists for the given id
    #[error("Record '{id}' not found")]
    NotFound {
        /// Record id
        id: String,
    },

    /// The service was used before `init` or after `dispose`
    #[error("Offline service is not initialized")]
    NotInitialized,
}

impl OfflineError {
    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Create a new server error
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a new integrity error for a storage key
    pub fn integrity(key: impl Into<String>) -> Self {
        Self::IntegrityCheckFailed { key: key.into() }
    }

    /// Whether a failed sync attempt may succeed later. Anything else drops the
    /// queue item at once and flags its record for manual resolution.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::ServerError { .. })
    }

    /// Whether a failed save is also published as a storage warning
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::StorageQuotaExceeded { .. })
    }
}

impl From<serde_json::Error> for OfflineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON error: {}", err),
        }
    }
}

/// SQLite reports a full database as result code 13 (`SQLITE_FULL`)
const SQLITE_FULL: &str = "13";

impl From<sqlx::Error> for OfflineError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(SQLITE_FULL) {
                return Self::StorageQuotaExceeded {
                    requested: 0,
                    available: 0,
                };
            }
        }
        Self::storage(err.to_string())
    }
}

impl From<reqwest::Error> for OfflineError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::server(status.as_u16(), err.to_string()),
            None => Self::network(err.to_string()),
        }
    }
}
