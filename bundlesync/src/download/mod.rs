//! Download strategies built on the transfer primitive.
//!
//! - [`WholeFileDownloader`]: one streaming GET with retry, size-based
//!   skipping and throttled progress
//! - [`ChunkedDownloader`]: parallel byte ranges into a pre-sized file,
//!   falling back to the whole-file path
//!
//! Both share [`RetryPolicy`] (linear back-off) and observe one
//! [`CancellationToken`](crate::cancel::CancellationToken) at every attempt.
//!
//! # Example
//!
//! ```ignore
//! use bundlesync::cancel::CancellationToken;
//! use bundlesync::download::{ChunkedDownloader, FetchOptions, TransferTarget};
//! use bundlesync::transfer::ReqwestSource;
//!
//! let source = ReqwestSource::new()?;
//! let token = CancellationToken::new();
//! let target = TransferTarget::new("https://example.com/jre.tar.gz", "/tmp/jre.tar.gz");
//!
//! ChunkedDownloader::new(&source).fetch_large(&target, &FetchOptions::new(&token))?;
//! ```

mod chunked;
mod retry;
mod target;
mod whole;

pub use chunked::{plan_ranges, ChunkedDownloader, DEFAULT_CHUNK_CONCURRENCY, DEFAULT_CHUNK_SIZE};
pub use retry::{RetryPolicy, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
pub use target::TransferTarget;
pub use whole::{FetchOptions, FetchOutcome, WholeFileDownloader};
