//! Bundle provisioning.
//!
//! [`Provisioner::provision`] runs the stages for one bundle in order:
//!
//! 1. packaged archive: chunked download into a private directory next to
//!    the target, then reconciliation
//! 2. item files: synchronized into the content folder
//! 3. preload files: whole-file downloads with a size check
//! 4. orphan cleanup of the content folder, only when no archive governs
//!    the bundle
//!
//! Every stage shares one cancellation token and one progress sink.
//! Archive failures abort the request; item and preload failures are
//! recorded in the report.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::bundle::ManagedBundle;
use crate::cancel::{ensure_active, CancellationToken};
use crate::cleanup::{cleanup_orphans, CleanupReport};
use crate::config::{is_folder_name, DEFAULT_CONTENT_FOLDER};
use crate::download::{
    ChunkedDownloader, FetchOptions, FetchOutcome, TransferTarget, WholeFileDownloader,
    DEFAULT_RETRIES,
};
use crate::error::{ProvisionError, ProvisionResult};
use crate::items::{filename_from_url, ItemFailure, ItemSynchronizer, SyncReport};
use crate::progress::{NoopSink, ProgressEvent, ProgressSink};
use crate::reconcile::{ArchiveReconciler, ReconcileReport};

const DOWNLOAD_PREFIX: &str = ".bundlesync-download-";

/// File name used when an archive address has no usable last segment.
const FALLBACK_ARCHIVE_NAME: &str = "bundle.archive";

/// Summary of one provisioning request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Bundle identifier.
    pub bundle_id: String,
    /// Archive reconciliation, when the bundle declares an archive.
    pub archive: Option<ReconcileReport>,
    /// Item synchronization, when the bundle declares files.
    pub items: Option<SyncReport>,
    /// Preload files downloaded.
    pub preload_downloaded: Vec<String>,
    /// Preload files already present with the remote size.
    pub preload_skipped: Vec<String>,
    /// Preload files that failed.
    pub preload_failed: Vec<ItemFailure>,
    /// Orphan cleanup, when no archive governs the bundle.
    pub cleanup: Option<CleanupReport>,
}

impl ProvisionReport {
    /// Whether any item or preload file failed.
    pub fn has_failures(&self) -> bool {
        !self.preload_failed.is_empty()
            || self.items.as_ref().is_some_and(|items| !items.failed.is_empty())
    }
}

/// Runs every provisioning stage for a bundle.
pub struct Provisioner<'e> {
    chunked: ChunkedDownloader<'e>,
    whole: WholeFileDownloader<'e>,
    reconciler: ArchiveReconciler<'e>,
    items: ItemSynchronizer<'e>,
    content_folder: String,
    retries: u32,
    sink: &'e dyn ProgressSink,
}

impl<'e> Provisioner<'e> {
    /// Assemble a provisioner from its components.
    pub fn new(
        chunked: ChunkedDownloader<'e>,
        whole: WholeFileDownloader<'e>,
        reconciler: ArchiveReconciler<'e>,
        items: ItemSynchronizer<'e>,
    ) -> Self {
        Self {
            chunked,
            whole,
            reconciler,
            items,
            content_folder: DEFAULT_CONTENT_FOLDER.to_string(),
            retries: DEFAULT_RETRIES,
            sink: &NoopSink,
        }
    }

    /// Folder under the target that receives item and preload files.
    pub fn with_content_folder(mut self, folder: impl Into<String>) -> Self {
        self.content_folder = folder.into();
        self
    }

    /// Retries for archive fallback and preload downloads.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Report download progress to `sink`.
    pub fn with_sink(mut self, sink: &'e dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    /// Provision `bundle` into `target_dir`.
    pub fn provision(
        &self,
        bundle: &ManagedBundle,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<ProvisionReport> {
        bundle.validate()?;
        if !is_folder_name(&self.content_folder) {
            return Err(ProvisionError::Config(format!(
                "content folder {:?} is not a single folder name",
                self.content_folder
            )));
        }
        ensure_active(cancel)?;
        fs::create_dir_all(target_dir).map_err(|e| ProvisionError::io(target_dir, e))?;

        info!(bundle = %bundle.id, target = %target_dir.display(), "Provisioning bundle");
        let mut report = ProvisionReport {
            bundle_id: bundle.id.clone(),
            ..ProvisionReport::default()
        };
        let content_dir = target_dir.join(&self.content_folder);

        if let Some(ref url) = bundle.archive {
            report.archive = Some(self.install_archive(url, target_dir, cancel)?);
        }

        if !bundle.files.is_empty() {
            report.items = Some(self.items.sync_items(&bundle.files, &content_dir, cancel)?);
        }

        if !bundle.preload.is_empty() {
            self.download_preloads(bundle, &content_dir, &mut report, cancel)?;
        }

        if bundle.archive.is_none() {
            ensure_active(cancel)?;
            let keep = wanted_names(bundle);
            report.cleanup = Some(cleanup_orphans(&content_dir, &keep));
        }

        info!(
            bundle = %bundle.id,
            failures = report.has_failures(),
            "Provisioning complete"
        );
        Ok(report)
    }

    fn install_archive(
        &self,
        url: &str,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<ReconcileReport> {
        let parent = match target_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let download_dir = tempfile::Builder::new()
            .prefix(DOWNLOAD_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| ProvisionError::io(&parent, e))?;

        let name = filename_from_url(url).unwrap_or_else(|| FALLBACK_ARCHIVE_NAME.to_string());
        let target = TransferTarget::new(url, download_dir.path().join(&name));

        let task = format!("download:{}", name);
        let sink = self.sink;
        let progress = |current: u64, total: u64| {
            sink.emit(ProgressEvent::new(task.as_str(), current, total));
        };
        let options = FetchOptions::new(cancel)
            .with_retries(self.retries)
            .with_progress(&progress);

        info!(url = %url, "Downloading bundle archive");
        self.chunked.fetch_large(&target, &options)?;

        let result = self.reconciler.reconcile(&target.destination, target_dir, cancel);

        let download_path = download_dir.path().to_path_buf();
        if let Err(e) = download_dir.close() {
            warn!(path = %download_path.display(), error = %e, "Failed to remove archive download");
        }
        result
    }

    fn download_preloads(
        &self,
        bundle: &ManagedBundle,
        content_dir: &Path,
        report: &mut ProvisionReport,
        cancel: &CancellationToken,
    ) -> ProvisionResult<()> {
        fs::create_dir_all(content_dir).map_err(|e| ProvisionError::io(content_dir, e))?;

        for item in &bundle.preload {
            ensure_active(cancel)?;

            let Some(name) = item.file_name() else {
                report.preload_failed.push(ItemFailure {
                    url: item.url.clone(),
                    reason: "no file name in address".to_string(),
                });
                continue;
            };

            let task = format!("preload:{}", name);
            let sink = self.sink;
            let progress = |current: u64, total: u64| {
                sink.emit(ProgressEvent::new(task.as_str(), current, total));
            };
            let options = FetchOptions::new(cancel)
                .with_retries(self.retries)
                .with_check_size(true)
                .with_progress(&progress);
            let target = TransferTarget::new(&item.url, content_dir.join(&name));

            match self.whole.fetch(&target, &options) {
                Ok(FetchOutcome::Skipped { .. }) => {
                    debug!(name = %name, "Preload file up to date");
                    report.preload_skipped.push(name);
                }
                Ok(FetchOutcome::Downloaded { bytes }) => {
                    debug!(name = %name, bytes, "Preload file downloaded");
                    report.preload_downloaded.push(name);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(url = %item.url, error = %e, "Preload download failed");
                    report.preload_failed.push(ItemFailure {
                        url: item.url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Names the bundle still wants in its content folder.
fn wanted_names(bundle: &ManagedBundle) -> HashSet<String> {
    bundle
        .files
        .iter()
        .filter_map(|url| filename_from_url(url))
        .chain(bundle.preload.iter().filter_map(|item| item.file_name()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::PreloadItem;
    use crate::extract::ExtractorChain;
    use crate::progress::CallbackSink;
    use crate::testutil::{write_file, write_zip};
    use crate::transfer::MemorySource;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const ARCHIVE_URL: &str = "https://cdn.example.com/pack.zip";

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.zip");
        write_zip(&path, entries);
        fs::read(path).unwrap()
    }

    fn run(
        source: &MemorySource,
        bundle: &ManagedBundle,
        target: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ProvisionResult<ProvisionReport> {
        let extractor = ExtractorChain::native_only();
        let whole = WholeFileDownloader::new(source).with_retry_delay(Duration::from_millis(1));
        let chunked = ChunkedDownloader::new(source)
            .with_chunk_size(64)
            .with_retry_delay(Duration::from_millis(1));
        let provisioner = Provisioner::new(
            chunked,
            whole,
            ArchiveReconciler::new(&extractor).with_sink(sink),
            ItemSynchronizer::new(whole).with_retries(0).with_sink(sink),
        )
        .with_retries(1)
        .with_sink(sink);
        provisioner.provision(bundle, target, cancel)
    }

    #[test]
    fn test_archive_then_items_then_preload() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("instance");
        let archive = zip_bytes(&[
            ("MyPack/mods/a.jar", b"mod a".as_slice()),
            ("MyPack/config/x.cfg", b"cfg".as_slice()),
        ]);
        let source = MemorySource::new()
            .with_resource(ARCHIVE_URL, archive)
            .with_resource("https://cdn.example.com/extra/b.jar", b"mod b".to_vec())
            .with_resource("https://cdn.example.com/p?id=1", b"preload".to_vec());
        let bundle = ManagedBundle::new("pack")
            .with_archive(ARCHIVE_URL)
            .with_files(["https://cdn.example.com/extra/b.jar"])
            .with_preload(PreloadItem::new("https://cdn.example.com/p?id=1").with_name("p.jar"));

        let report = run(&source, &bundle, &target, &NoopSink, &CancellationToken::new()).unwrap();

        assert_eq!(fs::read(target.join("mods/a.jar")).unwrap(), b"mod a");
        assert_eq!(fs::read(target.join("mods/b.jar")).unwrap(), b"mod b");
        assert_eq!(fs::read(target.join("mods/p.jar")).unwrap(), b"preload");
        assert_eq!(report.archive.unwrap().flattened.as_deref(), Some("MyPack"));
        assert_eq!(report.items.unwrap().downloaded, vec!["b.jar".to_string()]);
        assert_eq!(report.preload_downloaded, vec!["p.jar".to_string()]);
        assert!(report.cleanup.is_none());
    }

    #[test]
    fn test_archive_download_dir_removed() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("instance");
        let source = MemorySource::new()
            .with_resource(ARCHIVE_URL, zip_bytes(&[("mods/a.jar", b"a".as_slice())]));
        let bundle = ManagedBundle::new("pack").with_archive(ARCHIVE_URL);

        run(&source, &bundle, &target, &NoopSink, &CancellationToken::new()).unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != "instance")
            .collect();
        assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
    }

    #[test]
    fn test_archive_failure_aborts_request() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("instance");
        let source = MemorySource::new()
            .with_resource(ARCHIVE_URL, b"not an archive at all".to_vec())
            .with_resource("https://cdn.example.com/b.jar", b"b".to_vec());
        let bundle = ManagedBundle::new("pack")
            .with_archive(ARCHIVE_URL)
            .with_files(["https://cdn.example.com/b.jar"]);

        let err = run(&source, &bundle, &target, &NoopSink, &CancellationToken::new()).unwrap_err();

        assert!(matches!(err, ProvisionError::ExtractionFailed { .. }));
        assert!(!target.join("mods/b.jar").exists());
    }

    #[test]
    fn test_cleanup_only_without_archive() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("instance");
        write_file(&target, "mods/stale.jar", b"old");
        write_file(&target, "mods/essential-client.jar", b"keep");
        write_file(&target, "mods/b.jar", b"b");
        let source = MemorySource::new()
            .with_resource("https://cdn.example.com/b.jar", b"b".to_vec());
        let bundle = ManagedBundle::new("pack").with_files(["https://cdn.example.com/b.jar"]);

        let report = run(&source, &bundle, &target, &NoopSink, &CancellationToken::new()).unwrap();

        assert!(!target.join("mods/stale.jar").exists());
        assert!(target.join("mods/essential-client.jar").exists());
        assert_eq!(report.items.unwrap().skipped, vec!["b.jar".to_string()]);
        let cleanup = report.cleanup.unwrap();
        assert_eq!(cleanup.removed, vec!["stale.jar".to_string()]);
        assert_eq!(cleanup.protected, 1);
        assert_eq!(source.get_count(), 0);
    }

    #[test]
    fn test_content_folder_must_be_single_name() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("instance");
        write_file(&target, "saves/world/level.dat", b"world");
        write_file(&target, "options.txt", b"fov:90");
        let source = MemorySource::new()
            .with_resource("https://cdn.example.com/b.jar", b"b".to_vec());
        let bundle = ManagedBundle::new("pack").with_files(["https://cdn.example.com/b.jar"]);
        let extractor = ExtractorChain::native_only();
        let whole = WholeFileDownloader::new(&source);

        for folder in [".", "", "..", "mods/extra"] {
            let provisioner = Provisioner::new(
                ChunkedDownloader::new(&source),
                whole,
                ArchiveReconciler::new(&extractor),
                ItemSynchronizer::new(whole),
            )
            .with_content_folder(folder);

            let err = provisioner
                .provision(&bundle, &target, &CancellationToken::new())
                .unwrap_err();
            assert!(matches!(err, ProvisionError::Config(_)), "{:?}", folder);
        }

        assert!(target.join("saves/world/level.dat").exists());
        assert!(target.join("options.txt").exists());
        assert_eq!(source.get_count(), 0);
    }

    #[test]
    fn test_preload_failure_recorded() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("instance");
        let source = MemorySource::new()
            .with_resource("https://cdn.example.com/ok.jar", b"ok".to_vec())
            .with_resource("https://cdn.example.com/bad.jar", b"bad".to_vec())
            .with_failures("https://cdn.example.com/bad.jar", u32::MAX);
        let bundle = ManagedBundle::new("pack")
            .with_preload(PreloadItem::new("https://cdn.example.com/bad.jar"))
            .with_preload(PreloadItem::new("https://cdn.example.com/ok.jar"));

        let report = run(&source, &bundle, &target, &NoopSink, &CancellationToken::new()).unwrap();

        assert!(report.has_failures());
        assert_eq!(report.preload_failed.len(), 1);
        assert_eq!(report.preload_downloaded, vec!["ok.jar".to_string()]);
        assert!(target.join("mods/ok.jar").exists());
        assert!(!target.join("mods/bad.jar").exists());
    }

    #[test]
    fn test_preload_skipped_when_size_matches() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("instance");
        write_file(&target, "mods/p.jar", b"12345");
        let source =
            MemorySource::new().with_resource("https://cdn.example.com/p.jar", b"abcde".to_vec());
        let bundle =
            ManagedBundle::new("pack").with_preload(PreloadItem::new(
                "https://cdn.example.com/p.jar",
            ));

        let report = run(&source, &bundle, &target, &NoopSink, &CancellationToken::new()).unwrap();

        assert_eq!(report.preload_skipped, vec!["p.jar".to_string()]);
        assert_eq!(source.bytes_served(), 0);
        assert_eq!(fs::read(target.join("mods/p.jar")).unwrap(), b"12345");
    }

    #[test]
    fn test_progress_labels() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("instance");
        let source = MemorySource::new()
            .with_resource(ARCHIVE_URL, zip_bytes(&[("mods/a.jar", b"a".as_slice())]))
            .with_resource("https://cdn.example.com/p.jar", b"p".to_vec());
        let bundle = ManagedBundle::new("pack")
            .with_archive(ARCHIVE_URL)
            .with_preload(PreloadItem::new("https://cdn.example.com/p.jar"));
        let tasks = Mutex::new(HashSet::new());
        let sink = CallbackSink::new(|event: ProgressEvent| {
            tasks.lock().insert(event.task);
        });

        run(&source, &bundle, &target, &sink, &CancellationToken::new()).unwrap();

        let tasks = tasks.lock();
        assert!(tasks.contains("download:pack.zip"));
        assert!(tasks.contains("extract"));
        assert!(tasks.contains("preload:p.jar"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = run(
            &source,
            &ManagedBundle::new("pack"),
            &temp.path().join("instance"),
            &NoopSink,
            &token,
        )
        .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[test]
    fn test_invalid_bundle_rejected() {
        let temp = TempDir::new().unwrap();
        let source = MemorySource::new();
        let err = run(
            &source,
            &ManagedBundle::new(""),
            temp.path(),
            &NoopSink,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidBundle(_)));
    }
}
