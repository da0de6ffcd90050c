//! Blocking HTTP backend for [`RemoteSource`].

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;

use super::{ByteRange, RemoteBody, RemoteSource, ResourceMetadata};
use crate::error::{ProvisionError, ProvisionResult, TransferError};

/// Default timeout for a whole request, body included (30 minutes).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default connect timeout (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP-based remote source using a blocking reqwest client.
///
/// One client is shared by every worker of a provisioning request, so
/// connections are pooled across chunks and items.
#[derive(Debug, Clone)]
pub struct ReqwestSource {
    client: Client,
    timeout: Duration,
}

impl ReqwestSource {
    /// Create a source with default timeouts.
    pub fn new() -> ProvisionResult<Self> {
        Self::with_timeouts(DEFAULT_REQUEST_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a source with custom request and connect timeouts.
    pub fn with_timeouts(timeout: Duration, connect_timeout: Duration) -> ProvisionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(concat!("bundlesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// Request timeout in use.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> TransferError {
        let reason = if e.is_timeout() {
            format!("timed out after {}s", self.timeout.as_secs())
        } else {
            e.to_string()
        };
        TransferError::Http {
            url: url.to_string(),
            reason,
        }
    }
}

impl RemoteSource for ReqwestSource {
    fn head(&self, url: &str) -> Result<ResourceMetadata, TransferError> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| self.map_send_error(url, e))?;

        if !response.status().is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(metadata_from_headers(response.headers()))
    }

    fn get(&self, url: &str, range: Option<ByteRange>) -> Result<RemoteBody, TransferError> {
        let mut request = self.client.get(url);
        if let Some(r) = range {
            request = request.header(RANGE, r.header_value());
        }

        let response = request.send().map_err(|e| self.map_send_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // A 200 answer to a range request carries the whole body
        if range.is_some() && status != StatusCode::PARTIAL_CONTENT {
            return Err(TransferError::RangeIgnored {
                url: url.to_string(),
            });
        }

        let length = response.content_length();
        Ok(RemoteBody::new(Box::new(response), length))
    }
}

/// Size and range support from HEAD response headers.
///
/// A declared `Content-Length: 0` is a known empty resource.
fn metadata_from_headers(headers: &HeaderMap) -> ResourceMetadata {
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());

    let accepts_ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    ResourceMetadata {
        size,
        accepts_ranges,
    }
}
