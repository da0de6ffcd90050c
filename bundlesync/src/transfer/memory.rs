//! In-memory backend for [`RemoteSource`].
//!
//! Serves byte buffers keyed by URL. Failures, missing size metadata,
//! range support and slow reads can be scripted per source, and transfer
//! statistics are recorded so callers can assert how much work was done.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{ByteRange, RemoteBody, RemoteSource, ResourceMetadata};
use crate::error::TransferError;

/// Size of the pieces handed out by a slow reader.
const SLOW_READ_PIECE: usize = 16 * 1024;

#[derive(Debug, Default)]
struct Stats {
    head_count: AtomicUsize,
    get_count: AtomicUsize,
    bytes_served: AtomicU64,
}

/// In-memory remote source.
#[derive(Debug)]
pub struct MemorySource {
    resources: HashMap<String, Arc<Vec<u8>>>,
    failures: Mutex<HashMap<String, u32>>,
    supports_ranges: bool,
    honors_ranges: bool,
    reports_size: bool,
    read_delay: Option<Duration>,
    stats: Arc<Stats>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    /// Create an empty source that supports ranges and reports sizes.
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            supports_ranges: true,
            honors_ranges: true,
            reports_size: true,
            read_delay: None,
            stats: Arc::new(Stats::default()),
        }
    }

    /// Serve `data` at `url`.
    pub fn with_resource(mut self, url: impl Into<String>, data: Vec<u8>) -> Self {
        self.resources.insert(url.into(), Arc::new(data));
        self
    }

    /// Fail the next `times` GET requests for `url` (`u32::MAX` = always).
    pub fn with_failures(self, url: impl Into<String>, times: u32) -> Self {
        self.failures.lock().insert(url.into(), times);
        self
    }

    /// Stop advertising byte-range support.
    pub fn without_ranges(mut self) -> Self {
        self.supports_ranges = false;
        self
    }

    /// Keep advertising ranges but answer ranged GETs with the full body,
    /// like a server that returns 200 to a `Range` header.
    pub fn ignoring_ranges(mut self) -> Self {
        self.honors_ranges = false;
        self
    }

    /// Stop reporting sizes from `head`.
    pub fn without_size(mut self) -> Self {
        self.reports_size = false;
        self
    }

    /// Sleep for `delay` before every piece handed out by a body stream.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Number of HEAD requests served.
    pub fn head_count(&self) -> usize {
        self.stats.head_count.load(Ordering::SeqCst)
    }

    /// Number of GET requests received.
    pub fn get_count(&self) -> usize {
        self.stats.get_count.load(Ordering::SeqCst)
    }

    /// Total body bytes delivered to readers.
    pub fn bytes_served(&self) -> u64 {
        self.stats.bytes_served.load(Ordering::SeqCst)
    }

    fn should_fail(&self, url: &str) -> bool {
        let mut failures = self.failures.lock();
        match failures.get_mut(url) {
            Some(0) | None => false,
            Some(remaining) => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
        }
    }

    fn lookup(&self, url: &str) -> Result<&Arc<Vec<u8>>, TransferError> {
        self.resources.get(url).ok_or_else(|| TransferError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

impl RemoteSource for MemorySource {
    fn head(&self, url: &str) -> Result<ResourceMetadata, TransferError> {
        self.stats.head_count.fetch_add(1, Ordering::SeqCst);
        let data = self.lookup(url)?;
        Ok(ResourceMetadata {
            size: self.reports_size.then_some(data.len() as u64),
            accepts_ranges: self.supports_ranges,
        })
    }

    fn get(&self, url: &str, range: Option<ByteRange>) -> Result<RemoteBody, TransferError> {
        self.stats.get_count.fetch_add(1, Ordering::SeqCst);
        let data = Arc::clone(self.lookup(url)?);

        if self.should_fail(url) {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: 503,
            });
        }

        let (start, end) = match range {
            Some(_) if !self.supports_ranges || !self.honors_ranges => {
                return Err(TransferError::RangeIgnored {
                    url: url.to_string(),
                })
            }
            Some(r) => {
                let len = data.len() as u64;
                if r.start >= len || r.end > len {
                    return Err(TransferError::Status {
                        url: url.to_string(),
                        status: 416,
                    });
                }
                (r.start as usize, r.end as usize)
            }
            None => (0, data.len()),
        };

        let reader = MemoryReader {
            data,
            position: start,
            end,
            delay: self.read_delay,
            stats: Arc::clone(&self.stats),
        };
        Ok(RemoteBody::new(Box::new(reader), Some((end - start) as u64)))
    }
}

struct MemoryReader {
    data: Arc<Vec<u8>>,
    position: usize,
    end: usize,
    delay: Option<Duration>,
    stats: Arc<Stats>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.end {
            return Ok(0);
        }

        let mut n = (self.end - self.position).min(buf.len());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
            n = n.min(SLOW_READ_PIECE);
        }

        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        self.stats.bytes_served.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }
}
