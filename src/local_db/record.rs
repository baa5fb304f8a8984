//! # Offline Records
//!
//! The unit of local persistence: one questionnaire/form payload together with its
//! correlation fields, version counter and integrity checksum.
//!
//! The checksum is CRC-32 (IEEE polynomial, via `crc32fast`) over the compact JSON
//! encoding of the payload. It detects accidental corruption of stored bytes. It is
//! not a security control: anyone able to edit storage can recompute it.

use crate::offline::queue::SyncAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Domain correlation fields, opaque to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Correlation {
    /// Patient the examination belongs to
    pub patient_id: String,
    /// Examination type, e.g. `pre_employment`
    pub examination_type: String,
}

impl Correlation {
    pub fn new(patient_id: impl Into<String>, examination_type: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            examination_type: examination_type.into(),
        }
    }
}

/// Free-form record metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RecordMetadata {
    /// Identity of the client that produced the save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Completion fraction per form section
    #[serde(default)]
    pub section_progress: BTreeMap<String, f64>,
    /// Validation errors outstanding at save time
    #[serde(default)]
    pub validation_errors: Vec<String>,
    /// Anything else the caller wants to keep alongside the record
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Local sync state of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordSyncStatus {
    /// Waiting for (or going through) sync
    #[default]
    Pending,
    /// Retries were exhausted; the operator must resubmit
    RequiresResolution {
        /// The dropped remote operation, signature included
        action: SyncAction,
        attempts: u32,
        last_error: String,
    },
}

/// A locally persisted form record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
    pub id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub patient_id: String,
    pub examination_type: String,
    /// Bumped on every save, starting at 1
    pub version: u64,
    /// CRC-32 of `payload`
    pub checksum: u32,
    #[serde(default)]
    pub metadata: RecordMetadata,
    #[serde(default)]
    pub sync_status: RecordSyncStatus,
}

impl OfflineRecord {
    /// First save of a record
    pub fn new(
        id: impl Into<String>,
        correlation: Correlation,
        payload: Value,
        metadata: RecordMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        let checksum = payload_checksum(&payload);
        Self {
            id: id.into(),
            payload,
            created_at: now,
            last_modified: now,
            patient_id: correlation.patient_id,
            examination_type: correlation.examination_type,
            version: 1,
            checksum,
            metadata,
            sync_status: RecordSyncStatus::Pending,
        }
    }

    /// Subsequent save: new payload, new version, same creation time
    pub fn revise(
        &self,
        correlation: Correlation,
        payload: Value,
        metadata: RecordMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            created_at: self.created_at,
            version: self.version + 1,
            ..Self::new(self.id.clone(), correlation, payload, metadata, now)
        }
    }

    /// Recompute the checksum after the payload was replaced in place
    pub fn seal(mut self) -> Self {
        self.checksum = payload_checksum(&self.payload);
        self
    }

    /// Whether the stored checksum matches the payload
    pub fn verify(&self) -> bool {
        payload_checksum(&self.payload) == self.checksum
    }

    pub fn correlation(&self) -> Correlation {
        Correlation::new(self.patient_id.clone(), self.examination_type.clone())
    }

    pub fn requires_resolution(&self) -> bool {
        matches!(self.sync_status, RecordSyncStatus::RequiresResolution { .. })
    }

    /// Remote operation that ran out of retries, if any
    pub fn unsent_action(&self) -> Option<&SyncAction> {
        match &self.sync_status {
            RecordSyncStatus::RequiresResolution { action, .. } => Some(action),
            RecordSyncStatus::Pending => None,
        }
    }
}

/// CRC-32 over the compact JSON form of a payload
pub fn payload_checksum(payload: &Value) -> u32 {
    crc32fast::hash(payload.to_string().as_bytes())
}
