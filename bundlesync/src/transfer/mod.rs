//! Remote resource access and the transfer primitive.
//!
//! Every download strategy is composed from two calls on a [`RemoteSource`]:
//! a metadata-only `head` and a streaming `get` with an optional
//! [`ByteRange`]. [`transfer_into`] performs one GET and streams the body
//! into a writer, reporting bytes as they arrive.
//!
//! # Backends
//!
//! - [`ReqwestSource`]: blocking HTTP client (GET/HEAD with `Range`)
//! - [`MemorySource`]: in-memory resources with scripted failures

mod http;
mod memory;

pub use http::{ReqwestSource, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
pub use memory::MemorySource;

use std::fmt;
use std::io::{Read, Write};

use crate::cancel::CancellationToken;
use crate::error::TransferError;

/// Buffer size for streaming transfers (64KB).
pub const BUFFER_SIZE: usize = 64 * 1024;

/// A half-open byte interval `[start, end)` of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte offset (inclusive).
    pub start: u64,
    /// End offset (exclusive).
    pub end: u64,
}

impl ByteRange {
    /// Create a range covering `[start, end)`.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value for an HTTP `Range` header (inclusive end).
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Metadata reported by a HEAD request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceMetadata {
    /// Declared size in bytes, if the server reported one.
    pub size: Option<u64>,
    /// Whether the server advertises byte-range support.
    pub accepts_ranges: bool,
}

/// An open response body.
pub struct RemoteBody {
    /// Body length, if the server declared one.
    pub length: Option<u64>,
    reader: Box<dyn Read + Send>,
}

impl RemoteBody {
    /// Wrap a reader with an optional declared length.
    pub fn new(reader: Box<dyn Read + Send>, length: Option<u64>) -> Self {
        Self { length, reader }
    }
}

impl Read for RemoteBody {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for RemoteBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBody")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Access to remote resources.
///
/// Implementations must be shareable between worker threads.
pub trait RemoteSource: Send + Sync {
    /// Fetch metadata without transferring the body.
    fn head(&self, url: &str) -> Result<ResourceMetadata, TransferError>;

    /// Open a body stream, optionally restricted to `range`.
    ///
    /// When a range is requested the stream must yield exactly that range;
    /// implementations return [`TransferError::RangeIgnored`] otherwise.
    fn get(&self, url: &str, range: Option<ByteRange>) -> Result<RemoteBody, TransferError>;
}

/// Perform one GET and stream the body into `writer`.
///
/// `on_bytes` receives the running byte count and the expected total (0 when
/// unknown) after every buffer. The cancellation token is checked before the
/// request and between reads. The body length is validated against the
/// requested range, or against the declared length when there is no range.
pub fn transfer_into(
    source: &dyn RemoteSource,
    url: &str,
    range: Option<ByteRange>,
    writer: &mut dyn Write,
    cancel: &CancellationToken,
    on_bytes: &mut dyn FnMut(u64, u64),
) -> Result<u64, TransferError> {
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    let mut body = source.get(url, range)?;
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut transferred: u64 = 0;
    let limit = range.map(|r| r.len()).or(body.length);
    let total = limit.unwrap_or(0);

    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let bytes_read = body.read(&mut buffer).map_err(|e| TransferError::Http {
            url: url.to_string(),
            reason: format!("read error: {}", e),
        })?;

        if bytes_read == 0 {
            break;
        }

        if let Some(expected) = limit {
            if transferred + bytes_read as u64 > expected {
                return Err(TransferError::SizeMismatch {
                    expected,
                    actual: transferred + bytes_read as u64,
                });
            }
        }

        writer.write_all(&buffer[..bytes_read])?;
        transferred += bytes_read as u64;
        on_bytes(transferred, total);
    }

    writer.flush()?;

    if let Some(expected) = limit {
        if transferred != expected {
            return Err(TransferError::SizeMismatch {
                expected,
                actual: transferred,
            });
        }
    }

    Ok(transferred)
}
