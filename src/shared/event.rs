/**
 * Application Event System
 *
 * This module defines the events the offline engine emits to the rest of the
 * application: connectivity changes, sync pass lifecycle, storage changes made
 * by other contexts, and the two user-visible warnings (quota pressure and
 * records that need manual resolution).
 */
use serde::{Deserialize, Serialize};

/// Event published on the [`EventBus`](crate::realtime::EventBus)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Connectivity flipped
    NetworkStatusChanged {
        /// New connectivity state
        is_online: bool,
    },
    /// A sync pass began
    SyncStarted,
    /// Progress inside the current pass
    SyncProgress {
        /// Items processed so far
        current: usize,
        /// Items in the pass snapshot
        total: usize,
    },
    /// A sync pass finished
    SyncCompleted {
        /// Items confirmed by the remote service
        success_count: usize,
        /// Items that failed in this pass
        fail_count: usize,
    },
    /// A sync pass ended with items still pending, or was aborted
    SyncError {
        /// Human-readable error message
        error: String,
    },
    /// Another context changed a storage key
    StorageChanged {
        /// Storage key that changed
        key: String,
        /// New serialized value, `None` when the key was removed
        new_value: Option<String>,
    },
    /// Storage usage crossed the warning threshold
    StorageWarning {
        /// Usage against the configured quota, 0-100+
        usage_percent: f64,
    },
    /// An item exhausted its retries; the local record is kept for the operator
    ResolutionRequired {
        /// Record id
        id: String,
        /// Attempts made
        attempts: u32,
        /// Last error reported by the remote service
        last_error: String,
    },
}

impl SyncEvent {
    /// Whether the event should be shown to the user as a warning
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            SyncEvent::StorageWarning { .. } | SyncEvent::ResolutionRequired { .. }
        )
    }
}
