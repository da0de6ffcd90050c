//! Error types for bundle provisioning.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors raised by a single HTTP transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The request could not be sent or the connection failed.
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// A byte-range request was answered with the full resource.
    #[error("server ignored range request for {url}")]
    RangeIgnored { url: String },

    /// Fewer or more bytes arrived than were expected.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Local I/O failed while writing the transferred bytes.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The cancellation signal was observed mid-transfer.
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Whether another attempt could succeed.
    ///
    /// A server that ignores ranges answers the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::RangeIgnored { .. } | Self::Cancelled)
    }
}

/// Errors that can occur while provisioning a bundle.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The shared cancellation signal was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// Retries were exhausted for a download.
    #[error("failed to download {url} after {attempts} attempt(s): {source}")]
    DownloadFailed {
        url: String,
        attempts: u32,
        #[source]
        source: TransferError,
    },

    /// Extraction or the copy/delete reconciliation phases failed.
    #[error("failed to extract {}: {reason}", path.display())]
    ExtractionFailed { path: PathBuf, reason: String },

    /// The runtime could not be located after a full install attempt.
    #[error("failed to install runtime {major}: {reason}")]
    InstallFailed { major: u32, reason: String },

    /// A filesystem operation outside reconciliation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The bundle descriptor is malformed.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ProvisionError {
    /// Whether this error is the result of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
