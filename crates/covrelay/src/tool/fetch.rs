//! Artifact fetching for pinned tool downloads.

use crate::result::AcquisitionError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Retrieves the bytes behind a URL
#[async_trait]
pub trait Fetcher: Send + Sync + fmt::Debug {
    /// Fetch `url` in full
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Fetch`] on network failure or non-success status
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AcquisitionError>;
}

/// HTTP(S) fetcher backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialised
    pub fn new(timeout: Duration) -> Result<Self, AcquisitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("covrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AcquisitionError::fetch("<client>", e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AcquisitionError> {
        tracing::info!(%url, "fetching tool artifact");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AcquisitionError::fetch(url, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AcquisitionError::fetch(url, format!("HTTP {}", status.as_u16())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AcquisitionError::fetch(url, e.to_string()))?;
        tracing::debug!(%url, size = bytes.len(), "artifact fetched");
        Ok(bytes.to_vec())
    }
}
