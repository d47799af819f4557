//! Report upload to the aggregation backend.
//!
//! One POST per run, no retries. The report body is sent as-is with the job
//! identity in the query string and the token in the `Authorization` header.
//! The bytes are checked against the validated artifact's digest first.

use crate::config::UploadConfig;
use crate::context::JobContext;
use crate::report::ReportArtifact;
use crate::result::UploadError;
use crate::tool::checksum;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What the backend answered to an accepted upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// HTTP status code
    pub status: u16,
    /// Response body, trimmed
    pub message: String,
}

/// Transmits a report artifact
#[async_trait]
pub trait Uploader: Send + Sync + fmt::Debug {
    /// Upload `artifact` on behalf of `context`'s job
    ///
    /// # Errors
    ///
    /// Returns error on network failure or backend rejection
    async fn upload(
        &self,
        artifact: &ReportArtifact,
        context: &JobContext,
    ) -> Result<UploadReceipt, UploadError>;
}

/// HTTP uploader backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpUploader {
    endpoint: reqwest::Url,
    client: reqwest::Client,
}

impl HttpUploader {
    /// Create an uploader for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not a URL or the client cannot be built
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let endpoint =
            reqwest::Url::parse(&config.endpoint).map_err(|e| UploadError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                message: e.to_string(),
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("covrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { endpoint, client })
    }

    /// Endpoint the report is posted to
    #[must_use]
    pub const fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(
        &self,
        artifact: &ReportArtifact,
        context: &JobContext,
    ) -> Result<UploadReceipt, UploadError> {
        let body = tokio::fs::read(&artifact.path)
            .await
            .map_err(|source| UploadError::Read {
                path: artifact.path.clone(),
                source,
            })?;
        let actual = checksum::sha256_hex(&body);
        if body.len() as u64 != artifact.size || !actual.eq_ignore_ascii_case(&artifact.sha256) {
            return Err(UploadError::ReportChanged {
                path: artifact.path.clone(),
                expected: artifact.sha256.clone(),
                actual,
            });
        }

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .query(&[("service", context.provider()), ("job", context.job_id())])
            .header(reqwest::header::CONTENT_TYPE, artifact.format.content_type())
            .body(body);
        if let Some(token) = context.upload_token() {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                format!("token {}", token.expose()),
            );
        }

        tracing::info!(
            endpoint = %self.endpoint,
            job = context.job_id(),
            size = artifact.size,
            "uploading coverage report"
        );

        let resp = request.send().await.map_err(|e| UploadError::Network {
            endpoint: self.endpoint.to_string(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        let message = match resp.text().await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::debug!(status = status.as_u16(), error = %e, "could not read upload response body");
                String::new()
            }
        };
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body: message,
            });
        }

        Ok(UploadReceipt {
            status: status.as_u16(),
            message,
        })
    }
}
