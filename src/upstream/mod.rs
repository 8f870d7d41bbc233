use crate::error::{AppError, Result};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Response statuses that mark an upstream call as failed and worth retrying
///
/// Transport failures (DNS resolution, refused connections, client timeouts)
/// never produce a status and are retried as well.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [404, 408, 500, 502, 503, 504];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Failure of a single upstream attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("http request failed: {0}")]
    Transport(String),

    #[error("http request failed with status {0}")]
    Status(u16),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transport(_) => true,
            UpstreamError::Status(status) => is_retryable_status(*status),
        }
    }
}

/// Completed upstream call
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP client used to build operations against dependencies
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    /// Create a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Perform one GET; a retryable status is reported as an error
    pub async fn get(&self, url: &str) -> std::result::Result<UpstreamResponse, UpstreamError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        debug!(url = %url, status, "Upstream responded");

        if is_retryable_status(status) {
            return Err(UpstreamError::Status(status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(UpstreamResponse { status, body })
    }
}
