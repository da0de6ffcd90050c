//! Whole-file streaming downloads.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::retry::{RetryPolicy, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
use super::target::TransferTarget;
use crate::cancel::{ensure_active, CancellationToken};
use crate::error::{ProvisionError, ProvisionResult, TransferError};
use crate::progress::{ByteProgress, ProgressThrottle, DEFAULT_PROGRESS_INTERVAL};
use crate::transfer::{transfer_into, RemoteSource};

/// Per-call options for a download.
#[derive(Clone, Copy)]
pub struct FetchOptions<'a> {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Skip the transfer when the local file already has the remote size.
    pub check_size: bool,
    /// Byte progress callback.
    pub progress: Option<ByteProgress<'a>>,
    /// Shared cancellation token.
    pub cancel: &'a CancellationToken,
}

impl<'a> FetchOptions<'a> {
    /// Default options bound to a token.
    pub fn new(cancel: &'a CancellationToken) -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            check_size: false,
            progress: None,
            cancel,
        }
    }

    /// Set the retry bound.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Enable or disable the size check.
    pub fn with_check_size(mut self, check_size: bool) -> Self {
        self.check_size = check_size;
        self
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, progress: ByteProgress<'a>) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for FetchOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("retries", &self.retries)
            .field("check_size", &self.check_size)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

/// Result of a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Bytes were transferred.
    Downloaded { bytes: u64 },
    /// The local file already matched; nothing was transferred.
    Skipped { bytes: u64 },
}

impl FetchOutcome {
    /// Size of the file now at the destination.
    pub fn bytes(&self) -> u64 {
        match *self {
            Self::Downloaded { bytes } | Self::Skipped { bytes } => bytes,
        }
    }

    /// Whether the transfer was skipped.
    pub fn was_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Streams a single resource to disk with retry and size-based skipping.
///
/// Bytes land in a `.part` sibling that is renamed into place on success
/// and removed on failure or cancellation.
#[derive(Clone, Copy)]
pub struct WholeFileDownloader<'s> {
    source: &'s dyn RemoteSource,
    retry_delay: Duration,
    progress_interval: Duration,
}

impl<'s> WholeFileDownloader<'s> {
    /// Create a downloader over `source` with default timings.
    pub fn new(source: &'s dyn RemoteSource) -> Self {
        Self {
            source,
            retry_delay: DEFAULT_RETRY_DELAY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set the back-off unit.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the minimum interval between progress reports.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Fetch `target` to its destination.
    pub fn fetch(
        &self,
        target: &TransferTarget,
        options: &FetchOptions<'_>,
    ) -> ProvisionResult<FetchOutcome> {
        ensure_active(options.cancel)?;
        let throttle = ProgressThrottle::new(self.progress_interval);

        if options.check_size {
            if let Some(bytes) = self.local_size_matches(target) {
                debug!(
                    url = %target.url,
                    path = %target.destination.display(),
                    bytes,
                    "Local file matches remote size, skipping"
                );
                throttle.finish(options.progress, bytes, bytes);
                return Ok(FetchOutcome::Skipped { bytes });
            }
        }

        if let Some(parent) = target.destination.parent() {
            fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
        }

        let partial = target.partial_path();
        let policy = RetryPolicy::new(options.retries, self.retry_delay);
        let result = policy.run(&target.url, options.cancel, |attempt| {
            debug!(url = %target.url, attempt, "Starting transfer");
            self.attempt(target, &partial, options, &throttle)
        });

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_partial(&partial);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&partial, &target.destination) {
            remove_partial(&partial);
            return Err(ProvisionError::io(&target.destination, e));
        }

        throttle.finish(options.progress, bytes, bytes);
        info!(
            url = %target.url,
            path = %target.destination.display(),
            bytes,
            "Download complete"
        );
        Ok(FetchOutcome::Downloaded { bytes })
    }

    fn local_size_matches(&self, target: &TransferTarget) -> Option<u64> {
        let local = fs::metadata(&target.destination)
            .ok()
            .filter(|m| m.is_file())?
            .len();

        let remote = match target.expected_size {
            Some(size) => Some(size),
            None => match self.source.head(&target.url) {
                Ok(meta) => meta.size,
                Err(e) => {
                    debug!(url = %target.url, error = %e, "Size query failed");
                    None
                }
            },
        };

        (remote == Some(local)).then_some(local)
    }

    fn attempt(
        &self,
        target: &TransferTarget,
        partial: &Path,
        options: &FetchOptions<'_>,
        throttle: &ProgressThrottle,
    ) -> Result<u64, TransferError> {
        let file = File::create(partial)?;
        let mut writer = BufWriter::new(file);
        let fallback_total = target.expected_size.unwrap_or(0);

        let bytes = transfer_into(
            self.source,
            &target.url,
            None,
            &mut writer,
            options.cancel,
            &mut |current, total| {
                let total = if total > 0 { total } else { fallback_total };
                throttle.report(options.progress, current, total);
            },
        )?;
        drop(writer);

        match target.expected_size {
            Some(expected) if expected != bytes => Err(TransferError::SizeMismatch {
                expected,
                actual: bytes,
            }),
            _ => Ok(bytes),
        }
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::MemorySource;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    const URL: &str = "mem://pack.zip";

    fn downloader(source: &MemorySource) -> WholeFileDownloader<'_> {
        WholeFileDownloader::new(source).with_retry_delay(Duration::ZERO)
    }

    #[test]
    fn test_fetch_writes_file() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new().with_resource(URL, vec![7u8; 200_000]);
        let token = CancellationToken::new();
        let target = TransferTarget::new(URL, temp.path().join("sub/pack.zip"));

        let outcome = downloader(&source)
            .fetch(&target, &FetchOptions::new(&token))
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 200_000 });
        assert_eq!(fs::read(&target.destination).unwrap().len(), 200_000);
        assert!(!target.partial_path().exists());
    }

    #[test]
    fn test_skip_when_size_matches() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new().with_resource(URL, vec![1u8; 64]);
        let token = CancellationToken::new();
        let dest = temp.path().join("pack.zip");
        fs::write(&dest, vec![0u8; 64]).unwrap();

        let outcome = downloader(&source)
            .fetch(
                &TransferTarget::new(URL, &dest),
                &FetchOptions::new(&token).with_check_size(true),
            )
            .unwrap();

        assert!(outcome.was_skipped());
        assert_eq!(source.get_count(), 0);
        assert_eq!(source.bytes_served(), 0);
        // Content is left alone
        assert_eq!(fs::read(&dest).unwrap(), vec![0u8; 64]);
    }

    #[test]
    fn test_skip_empty_file_with_empty_remote() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new().with_resource(URL, Vec::new());
        let token = CancellationToken::new();
        let dest = temp.path().join("empty.txt");
        fs::write(&dest, b"").unwrap();

        let outcome = downloader(&source)
            .fetch(
                &TransferTarget::new(URL, &dest),
                &FetchOptions::new(&token).with_check_size(true),
            )
            .unwrap();

        assert!(outcome.was_skipped());
        assert_eq!(source.get_count(), 0);
    }

    #[test]
    fn test_size_mismatch_redownloads() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new().with_resource(URL, vec![1u8; 64]);
        let token = CancellationToken::new();
        let dest = temp.path().join("pack.zip");
        fs::write(&dest, vec![0u8; 10]).unwrap();

        let outcome = downloader(&source)
            .fetch(
                &TransferTarget::new(URL, &dest),
                &FetchOptions::new(&token).with_check_size(true),
            )
            .unwrap();

        assert!(!outcome.was_skipped());
        assert_eq!(fs::read(&dest).unwrap(), vec![1u8; 64]);
    }

    #[test]
    fn test_expected_size_skips_head() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new().with_resource(URL, vec![1u8; 8]);
        let token = CancellationToken::new();
        let dest = temp.path().join("pack.zip");
        fs::write(&dest, vec![0u8; 8]).unwrap();

        let target = TransferTarget::new(URL, &dest).with_expected_size(8);
        let outcome = downloader(&source)
            .fetch(&target, &FetchOptions::new(&token).with_check_size(true))
            .unwrap();

        assert!(outcome.was_skipped());
        assert_eq!(source.head_count(), 0);
    }

    #[test]
    fn test_retries_then_succeeds() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new()
            .with_resource(URL, b"payload".to_vec())
            .with_failures(URL, 2);
        let token = CancellationToken::new();
        let target = TransferTarget::new(URL, temp.path().join("pack.zip"));

        downloader(&source)
            .fetch(&target, &FetchOptions::new(&token).with_retries(3))
            .unwrap();

        assert_eq!(source.get_count(), 3);
        assert_eq!(fs::read(&target.destination).unwrap(), b"payload");
    }

    #[test]
    fn test_exhausted_retries_cleans_partial() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new()
            .with_resource(URL, b"payload".to_vec())
            .with_failures(URL, u32::MAX);
        let token = CancellationToken::new();
        let target = TransferTarget::new(URL, temp.path().join("pack.zip"));

        let err = downloader(&source)
            .fetch(&target, &FetchOptions::new(&token).with_retries(2))
            .unwrap_err();

        assert!(matches!(err, ProvisionError::DownloadFailed { attempts: 3, .. }));
        assert_eq!(source.get_count(), 3);
        assert!(!target.destination.exists());
        assert!(!target.partial_path().exists());
    }

    #[test]
    fn test_expected_size_mismatch_fails() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new().with_resource(URL, b"abc".to_vec());
        let token = CancellationToken::new();
        let target = TransferTarget::new(URL, temp.path().join("pack.zip")).with_expected_size(10);

        let err = downloader(&source)
            .fetch(&target, &FetchOptions::new(&token).with_retries(0))
            .unwrap_err();

        match err {
            ProvisionError::DownloadFailed { source, .. } => {
                assert!(matches!(source, TransferError::SizeMismatch { expected: 10, actual: 3 }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_at_entry() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new().with_resource(URL, b"abc".to_vec());
        let token = CancellationToken::new();
        token.cancel();
        let target = TransferTarget::new(URL, temp.path().join("pack.zip"));

        let err = downloader(&source)
            .fetch(&target, &FetchOptions::new(&token))
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(source.get_count(), 0);
    }

    #[test]
    fn test_progress_monotonic_and_complete() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new().with_resource(URL, vec![3u8; 300_000]);
        let token = CancellationToken::new();
        let target = TransferTarget::new(URL, temp.path().join("pack.zip"));
        let seen = Mutex::new(Vec::new());
        let cb = |current: u64, total: u64| seen.lock().push((current, total));

        WholeFileDownloader::new(&source)
            .with_progress_interval(Duration::ZERO)
            .fetch(&target, &FetchOptions::new(&token).with_progress(&cb))
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.last(), Some(&(300_000, 300_000)));
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    }
}
