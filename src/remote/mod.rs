//! # Remote Examination API
//!
//! The sync engine talks to the remote service only through [`RemoteApi`]. The
//! endpoints are assumed idempotent enough to tolerate a repeated submission:
//! delivery is at-least-once, and two contexts sharing one store can both submit
//! the same queue item (see `DESIGN.md`, cross-context exclusion).
//!
//! - `http.rs`: [`HttpRemoteApi`], the `reqwest` implementation

pub mod http;

pub use http::HttpRemoteApi;

use crate::shared::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Collaborator operations consumed by the sync engine
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Register a new examination for a patient
    async fn create_record(
        &self,
        patient_id: &str,
        examination_id: &str,
        examination_type: &str,
    ) -> Result<()>;

    /// Replace the stored form payload of an examination
    async fn update_record(&self, id: &str, payload: &Value) -> Result<()>;

    /// Sign off an examination
    async fn complete_record(&self, id: &str, signature: &Value) -> Result<()>;
}
