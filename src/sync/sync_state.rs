//! # Sync State
//!
//! Snapshot of what the sync engine is doing, published on a `watch` channel.
//!
//! A pass moves `Idle → Syncing → {Succeeded | Failed} → Idle`. The terminal
//! phase is published and immediately followed by `Idle`, so a watcher that only
//! looks at the latest value reads the outcome from `last_result`.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    /// The pass left the queue empty
    Succeeded,
    /// Items remain queued, or storage failed mid-pass
    Failed,
}

/// Counters of a finished pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassReport {
    pub success_count: usize,
    pub fail_count: usize,
}

impl PassReport {
    pub fn total(&self) -> usize {
        self.success_count + self.fail_count
    }
}

/// How the last finished pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResult {
    Succeeded(PassReport),
    Failed(PassReport),
}

impl PassResult {
    pub fn report(&self) -> PassReport {
        match self {
            PassResult::Succeeded(report) | PassResult::Failed(report) => *report,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PassResult::Succeeded(_))
    }

    /// Terminal phase published for this result
    pub fn phase(&self) -> SyncPhase {
        match self {
            PassResult::Succeeded(_) => SyncPhase::Succeeded,
            PassResult::Failed(_) => SyncPhase::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncState {
    pub phase: SyncPhase,
    /// Items processed in the running pass
    pub current: usize,
    /// Items in the running pass
    pub total: usize,
    pub last_result: Option<PassResult>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        self.phase == SyncPhase::Syncing
    }

    /// Completion of the running pass, 0.0 to 1.0
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f32 / self.total as f32
        }
    }
}
