//! Synchronization service client.
//!
//! [`SyncApi`] is the object-safe boundary the uploader drives; the
//! [`HttpSyncApi`] implementation talks to the remote persister endpoints.
//! Application-level errors arrive as `{"error":{"code","message"}}` bodies
//! and are surfaced with their code and HTTP status so the retry handler can
//! classify them.

use std::time::Duration;

use async_trait::async_trait;
use graphbeam_types::{Entity, IntegrationError, PartialDatasetMetadata, Relationship};
use serde::Deserialize;
use serde_json::json;

use crate::job::{JobConfig, SyncJob};

/// Object-safe synchronization API surface.
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Initiate a synchronization job.
    async fn create_job(&self, config: &JobConfig) -> Result<SyncJob, IntegrationError>;

    /// Upload one entity batch.
    async fn upload_entities(
        &self,
        job_id: &str,
        entities: &[Entity],
    ) -> Result<(), IntegrationError>;

    /// Upload one relationship batch.
    async fn upload_relationships(
        &self,
        job_id: &str,
        relationships: &[Relationship],
    ) -> Result<(), IntegrationError>;

    /// Finalize the job with the run's partial-dataset metadata.
    async fn finalize_job(
        &self,
        job_id: &str,
        partial_datasets: &PartialDatasetMetadata,
    ) -> Result<SyncJob, IntegrationError>;

    /// Abort the job with a reason.
    async fn abort_job(&self, job_id: &str, reason: &str) -> Result<SyncJob, IntegrationError>;
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

/// HTTP implementation of [`SyncApi`].
#[derive(Debug, Clone)]
pub struct HttpSyncApi {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpSyncApi {
    /// Build a client against the given service base URL.
    ///
    /// # Errors
    ///
    /// Returns an `io` error when the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, IntegrationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntegrationError::io(format!("failed to build HTTP client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/persister/synchronization/jobs", self.base_url)
    }

    fn job_url(&self, job_id: &str, suffix: &str) -> String {
        format!("{}/{}/{}", self.jobs_url(), job_id, suffix)
    }

    async fn post(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, IntegrationError> {
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| {
            IntegrationError::upload_retriable("NETWORK_ERROR", format!("POST {url} failed: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let status = status.as_u16();
        let body_text = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body_text))
    }

    async fn post_for_job(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<SyncJob, IntegrationError> {
        let response = self.post(url, body).await?;
        response
            .json::<SyncJob>()
            .await
            .map_err(|e| IntegrationError::sync_api("MALFORMED_RESPONSE", e.to_string()))
    }
}

fn classify_response(status: u16, body: &str) -> IntegrationError {
    let (code, message) = match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => {
            let code = if status == 413 {
                "RequestEntityTooLargeException".to_string()
            } else {
                format!("HTTP_{status}")
            };
            (code, body.chars().take(200).collect())
        }
    };

    let retriable = status == 413 || status == 429 || status >= 500;
    if retriable {
        IntegrationError::upload_retriable(code, message).with_status(status)
    } else {
        IntegrationError::sync_api(code, message).with_status(status)
    }
}

#[async_trait]
impl SyncApi for HttpSyncApi {
    async fn create_job(&self, config: &JobConfig) -> Result<SyncJob, IntegrationError> {
        self.post_for_job(self.jobs_url(), config.initiate_body())
            .await
    }

    async fn upload_entities(
        &self,
        job_id: &str,
        entities: &[Entity],
    ) -> Result<(), IntegrationError> {
        self.post(
            self.job_url(job_id, "entities"),
            json!({ "entities": entities }),
        )
        .await
        .map(|_| ())
    }

    async fn upload_relationships(
        &self,
        job_id: &str,
        relationships: &[Relationship],
    ) -> Result<(), IntegrationError> {
        self.post(
            self.job_url(job_id, "relationships"),
            json!({ "relationships": relationships }),
        )
        .await
        .map(|_| ())
    }

    async fn finalize_job(
        &self,
        job_id: &str,
        partial_datasets: &PartialDatasetMetadata,
    ) -> Result<SyncJob, IntegrationError> {
        self.post_for_job(
            self.job_url(job_id, "finalize"),
            json!({ "partialDatasets": partial_datasets }),
        )
        .await
    }

    async fn abort_job(&self, job_id: &str, reason: &str) -> Result<SyncJob, IntegrationError> {
        self.post_for_job(self.job_url(job_id, "abort"), json!({ "reason": reason }))
            .await
    }
}
