/**
 * HTTP Examination Client
 *
 * `RemoteApi` over the examination REST endpoints:
 *
 * - `POST {base}/api/examinations`               create
 * - `PUT  {base}/api/examinations/{id}`          update
 * - `POST {base}/api/examinations/{id}/complete` complete
 *
 * Transport failures map to `NetworkError`, non-2xx answers to `ServerError`.
 */
use super::RemoteApi;
use crate::shared::config::OfflineConfig;
use crate::shared::error::{OfflineError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct CreateExaminationRequest<'a> {
    patient_id: &'a str,
    examination_id: &'a str,
    examination_type: &'a str,
}

#[derive(Debug, Serialize)]
struct CompleteExaminationRequest<'a> {
    signature: &'a Value,
}

/// `reqwest`-based examination API client
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteApi {
    pub fn new(config: &OfflineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| OfflineError::network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<()> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| OfflineError::network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(OfflineError::server(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_record(
        &self,
        patient_id: &str,
        examination_id: &str,
        examination_type: &str,
    ) -> Result<()> {
        let body = CreateExaminationRequest {
            patient_id,
            examination_id,
            examination_type,
        };
        self.send(self.client.post(self.url("/api/examinations")).json(&body))
            .await
    }

    async fn update_record(&self, id: &str, payload: &Value) -> Result<()> {
        let url = self.url(&format!("/api/examinations/{}", id));
        self.send(self.client.put(url).json(payload)).await
    }

    async fn complete_record(&self, id: &str, signature: &Value) -> Result<()> {
        let url = self.url(&format!("/api/examinations/{}/complete", id));
        self.send(self.client.post(url).json(&CompleteExaminationRequest { signature }))
            .await
    }
}
