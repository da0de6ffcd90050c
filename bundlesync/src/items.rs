//! Item-list synchronization.
//!
//! Each item is a URL whose decoded last path segment names a file in the
//! destination folder. Files that already exist are left alone; missing
//! ones are downloaded on a bounded rayon pool. One item failing never
//! stops the others.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cancel::{ensure_active, CancellationToken};
use crate::download::{FetchOptions, TransferTarget, WholeFileDownloader, DEFAULT_RETRIES};
use crate::error::{ProvisionError, ProvisionResult};
use crate::progress::{NoopSink, ProgressEvent, ProgressSink};

/// Progress label used for item synchronization.
pub const ITEMS_TASK: &str = "items";

/// Default number of concurrent item downloads.
pub const DEFAULT_ITEM_POOL: usize = 4;

/// Derive a local file name from a URL.
///
/// Uses the percent-decoded last non-empty path segment, ignoring query and
/// fragment. Returns `None` if nothing usable remains.
pub fn filename_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let path = without_fragment.split('?').next().unwrap_or(without_fragment);
    let segment = path.rsplit('/').find(|s| !s.is_empty())?;

    let decoded = urlencoding::decode(segment).ok()?.into_owned();
    let usable = !decoded.is_empty()
        && decoded != "."
        && decoded != ".."
        && !decoded.contains(['/', '\\'])
        && !decoded.ends_with(':');
    usable.then_some(decoded)
}

/// One item that could not be synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Item address.
    pub url: String,
    /// Last error, rendered.
    pub reason: String,
}

/// Outcome of one synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// File names downloaded.
    pub downloaded: Vec<String>,
    /// File names already present.
    pub skipped: Vec<String>,
    /// Items that failed.
    pub failed: Vec<ItemFailure>,
}

impl SyncReport {
    /// File names handled by this sync, downloaded or already present.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.downloaded.iter().chain(&self.skipped).map(String::as_str)
    }
}

enum ItemOutcome {
    Downloaded(String),
    Failed(ItemFailure),
    NotStarted,
}

/// Ensures a list of individually addressed files exists locally.
pub struct ItemSynchronizer<'s> {
    downloader: WholeFileDownloader<'s>,
    pool_size: usize,
    retries: u32,
    sink: &'s dyn ProgressSink,
}

impl<'s> ItemSynchronizer<'s> {
    /// Create a synchronizer with default pool size and retries.
    pub fn new(downloader: WholeFileDownloader<'s>) -> Self {
        Self {
            downloader,
            pool_size: DEFAULT_ITEM_POOL,
            retries: DEFAULT_RETRIES,
            sink: &NoopSink,
        }
    }

    /// Set the maximum number of concurrent downloads (minimum 1).
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// Set per-item retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Report progress to `sink`.
    pub fn with_sink(mut self, sink: &'s dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    /// Make sure every item exists in `dest_folder`.
    ///
    /// Only cancellation is returned as an error; it is reported once
    /// in-flight downloads have finished.
    pub fn sync_items(
        &self,
        items: &[String],
        dest_folder: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<SyncReport> {
        ensure_active(cancel)?;
        fs::create_dir_all(dest_folder).map_err(|e| ProvisionError::io(dest_folder, e))?;

        let mut report = SyncReport::default();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for url in items {
            let Some(name) = filename_from_url(url) else {
                warn!(url = %url, "Cannot derive file name from item address");
                report.failed.push(ItemFailure {
                    url: url.clone(),
                    reason: "no file name in address".to_string(),
                });
                continue;
            };

            if !seen.insert(name.clone()) {
                debug!(url = %url, name = %name, "Duplicate item name, skipping");
                continue;
            }

            if dest_folder.join(&name).exists() {
                debug!(name = %name, "Item already present");
                report.skipped.push(name);
            } else {
                pending.push((url.as_str(), name));
            }
        }

        if pending.is_empty() {
            return Ok(report);
        }

        let workers = self.pool_size.min(pending.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("item-sync-{}", i))
            .build()
            .map_err(|e| ProvisionError::Config(format!("cannot start item pool: {}", e)))?;

        info!(
            items = items.len(),
            missing = pending.len(),
            workers,
            folder = %dest_folder.display(),
            "Synchronizing items"
        );

        let total = pending.len() as u64;
        let finished = AtomicU64::new(0);

        let outcomes: Vec<ItemOutcome> = pool.install(|| {
            pending
                .par_iter()
                .map(|(url, name)| {
                    if cancel.is_cancelled() {
                        return ItemOutcome::NotStarted;
                    }
                    let outcome = self.fetch_item(url, name, dest_folder, cancel);
                    let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    self.sink.emit(
                        ProgressEvent::new(ITEMS_TASK, done, total).with_message(name.clone()),
                    );
                    outcome
                })
                .collect()
        });

        if cancel.is_cancelled() {
            info!(folder = %dest_folder.display(), "Item synchronization cancelled");
            return Err(ProvisionError::Cancelled);
        }

        for outcome in outcomes {
            match outcome {
                ItemOutcome::Downloaded(name) => report.downloaded.push(name),
                ItemOutcome::Failed(failure) => report.failed.push(failure),
                ItemOutcome::NotStarted => {}
            }
        }

        info!(
            downloaded = report.downloaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Item synchronization complete"
        );
        Ok(report)
    }

    fn fetch_item(
        &self,
        url: &str,
        name: &str,
        dest_folder: &Path,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        let target = TransferTarget::new(url, dest_folder.join(name));
        let options = FetchOptions::new(cancel).with_retries(self.retries);

        match self.downloader.fetch(&target, &options) {
            Ok(_) => ItemOutcome::Downloaded(name.to_string()),
            Err(ProvisionError::Cancelled) => ItemOutcome::NotStarted,
            Err(e) => {
                warn!(url = %url, error = %e, "Item download failed");
                ItemOutcome::Failed(ItemFailure {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
