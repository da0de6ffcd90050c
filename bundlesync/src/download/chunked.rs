//! Parallel ranged downloads into one pre-sized file.
//!
//! `[0, size)` is split into fixed-size [`ByteRange`]s. A bounded set of
//! scoped worker threads pull range indices from a shared cursor, and every
//! worker writes through its own file handle at the range's absolute
//! offset. Ranges never overlap, so the file needs no locking. Progress is
//! aggregated in [`ChunkCounters`] and reported by a polling thread.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::retry::{RetryPolicy, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
use super::target::TransferTarget;
use super::whole::{FetchOptions, FetchOutcome, WholeFileDownloader};
use crate::cancel::{ensure_active, CancellationToken};
use crate::error::{ProvisionError, ProvisionResult, TransferError};
use crate::progress::{report_until_done, ChunkCounters, DEFAULT_PROGRESS_INTERVAL};
use crate::transfer::{transfer_into, ByteRange, RemoteSource};

/// Default range size (10 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of concurrent range workers.
pub const DEFAULT_CHUNK_CONCURRENCY: usize = 4;

/// Split `[0, total)` into consecutive ranges of `chunk_size` bytes.
///
/// The last range is shorter when `total` is not a multiple of the chunk
/// size. A zero chunk size is treated as 1.
pub fn plan_ranges(total: u64, chunk_size: u64) -> Vec<ByteRange> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::with_capacity(total.div_ceil(chunk_size) as usize);
    let mut start = 0;
    while start < total {
        let end = start.saturating_add(chunk_size).min(total);
        ranges.push(ByteRange::new(start, end));
        start = end;
    }
    ranges
}

/// Shared state of one chunked download.
struct ChunkJob<'j> {
    url: &'j str,
    destination: &'j Path,
    ranges: Vec<ByteRange>,
    next: AtomicUsize,
    abort: AtomicBool,
    failure: Mutex<Option<ProvisionError>>,
    counters: ChunkCounters,
    cancel: &'j CancellationToken,
}

impl ChunkJob<'_> {
    fn fail(&self, error: ProvisionError) {
        self.abort.store(true, Ordering::SeqCst);
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(error);
        }
    }
}

/// Downloads large resources as parallel byte ranges.
///
/// Falls back to [`WholeFileDownloader`] when the server reports no size,
/// does not advertise range support, or answers a range request with the
/// full resource.
#[derive(Clone, Copy)]
pub struct ChunkedDownloader<'s> {
    source: &'s dyn RemoteSource,
    chunk_size: u64,
    concurrency: usize,
    chunk_retries: u32,
    retry_delay: Duration,
    progress_interval: Duration,
}

impl<'s> ChunkedDownloader<'s> {
    /// Create a downloader over `source` with default settings.
    pub fn new(source: &'s dyn RemoteSource) -> Self {
        Self {
            source,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CHUNK_CONCURRENCY,
            chunk_retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set the range size (minimum 1 byte).
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the worker count (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the per-range retry bound.
    pub fn with_chunk_retries(mut self, retries: u32) -> Self {
        self.chunk_retries = retries;
        self
    }

    /// Set the back-off unit.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the progress polling interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Range size in use.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Worker count in use.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn whole_file(&self) -> WholeFileDownloader<'s> {
        WholeFileDownloader::new(self.source)
            .with_retry_delay(self.retry_delay)
            .with_progress_interval(self.progress_interval)
    }

    /// Fetch `target` using parallel ranges when the server allows it.
    ///
    /// `options.retries` and `options.check_size` apply only to the
    /// whole-file fallback. On cancellation the pre-sized destination file
    /// is left in place; on failure it is removed.
    pub fn fetch_large(
        &self,
        target: &TransferTarget,
        options: &FetchOptions<'_>,
    ) -> ProvisionResult<FetchOutcome> {
        ensure_active(options.cancel)?;

        let metadata = match self.source.head(&target.url) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(url = %target.url, error = %e, "Metadata request failed");
                Default::default()
            }
        };

        let total = match metadata.size {
            Some(size) if metadata.accepts_ranges => size,
            _ => {
                info!(
                    url = %target.url,
                    size = ?metadata.size,
                    ranges = metadata.accepts_ranges,
                    "Range download unavailable, using whole-file download"
                );
                return self.whole_file().fetch(target, options);
            }
        };

        if let Some(parent) = target.destination.parent() {
            fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
        }

        // Held for the whole download; workers open their own handles.
        let file = File::create(&target.destination)
            .map_err(|e| ProvisionError::io(&target.destination, e))?;
        file.set_len(total)
            .map_err(|e| ProvisionError::io(&target.destination, e))?;

        let ranges = plan_ranges(total, self.chunk_size);
        let workers = self.concurrency.min(ranges.len()).max(1);
        info!(
            url = %target.url,
            bytes = total,
            chunks = ranges.len(),
            workers,
            "Starting chunked download"
        );

        let job = ChunkJob {
            url: &target.url,
            destination: &target.destination,
            counters: ChunkCounters::new(ranges.len()),
            ranges,
            next: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
            cancel: options.cancel,
        };

        let shared = &job;
        let this = self;
        thread::scope(|scope| {
            let reporter = options.progress.map(|callback| {
                let counters = &shared.counters;
                let interval = this.progress_interval;
                scope.spawn(move || report_until_done(counters, total, callback, interval))
            });

            let handles: Vec<_> = (0..workers)
                .map(|_| scope.spawn(move || this.run_worker(shared)))
                .collect();

            for handle in handles {
                if handle.join().is_err() {
                    shared.fail(ProvisionError::DownloadFailed {
                        url: target.url.clone(),
                        attempts: 0,
                        source: TransferError::Http {
                            url: target.url.clone(),
                            reason: "chunk worker panicked".to_string(),
                        },
                    });
                }
            }

            shared.counters.signal_done();
            if let Some(reporter) = reporter {
                let _ = reporter.join();
            }
        });
        drop(file);

        if options.cancel.is_cancelled() {
            info!(url = %target.url, "Chunked download cancelled");
            return Err(ProvisionError::Cancelled);
        }

        if let Some(error) = job.failure.into_inner() {
            if let Err(e) = fs::remove_file(&target.destination) {
                warn!(
                    path = %target.destination.display(),
                    error = %e,
                    "Failed to remove partial download"
                );
            }
            if is_range_ignored(&error) {
                info!(
                    url = %target.url,
                    "Server ignored range request, using whole-file download"
                );
                return self.whole_file().fetch(target, options);
            }
            return Err(error);
        }

        info!(url = %target.url, bytes = total, "Chunked download complete");
        Ok(FetchOutcome::Downloaded { bytes: total })
    }

    fn run_worker(&self, job: &ChunkJob<'_>) {
        loop {
            if job.abort.load(Ordering::SeqCst) || job.cancel.is_cancelled() {
                return;
            }

            let index = job.next.fetch_add(1, Ordering::SeqCst);
            let Some(range) = job.ranges.get(index).copied() else {
                return;
            };

            match self.fetch_range(job, index, range) {
                Ok(()) => {}
                Err(ProvisionError::Cancelled) => return,
                Err(e) => {
                    warn!(
                        url = %job.url,
                        chunk = index,
                        range = %range,
                        error = %e,
                        "Chunk failed"
                    );
                    job.fail(e);
                    return;
                }
            }
        }
    }

    fn fetch_range(
        &self,
        job: &ChunkJob<'_>,
        index: usize,
        range: ByteRange,
    ) -> ProvisionResult<()> {
        let policy = RetryPolicy::new(self.chunk_retries, self.retry_delay);
        policy.run(job.url, job.cancel, |attempt| {
            debug!(url = %job.url, chunk = index, range = %range, attempt, "Fetching chunk");
            job.counters.update_chunk(index, 0);

            let mut file = OpenOptions::new().write(true).open(job.destination)?;
            file.seek(SeekFrom::Start(range.start))?;
            let mut writer = BufWriter::new(file);

            transfer_into(
                self.source,
                job.url,
                Some(range),
                &mut writer,
                job.cancel,
                &mut |bytes, _| job.counters.update_chunk(index, bytes),
            )
            .map(|_| ())
        })
    }
}

fn is_range_ignored(error: &ProvisionError) -> bool {
    matches!(
        error,
        ProvisionError::DownloadFailed {
            source: TransferError::RangeIgnored { .. },
            ..
        }
    )
}
