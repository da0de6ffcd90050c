//! Archive reconciliation.
//!
//! An archive is extracted into a private staging directory next to the
//! target, an optional wrapper folder is flattened, and the live target is
//! brought in line with the staged tree in three sequential phases:
//!
//! 1. move every staged file into place, keeping existing settings files
//! 2. delete files under the watched folders that the staged tree lacks,
//!    keeping whitelisted add-ons
//! 3. drop the staging directory
//!
//! The staging directory is a [`tempfile::TempDir`], so it is removed on
//! every exit path.

pub mod rules;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cancel::{ensure_active, CancellationToken};
use crate::error::{ProvisionError, ProvisionResult};
use crate::extract::ExtractorChain;
use crate::fswalk::walk_files;
use crate::progress::{NoopSink, ProgressEvent, ProgressSink};

/// Progress label used for reconciliation.
pub const EXTRACT_TASK: &str = "extract";

const STAGING_PREFIX: &str = ".bundlesync-staging-";

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Wrapper folder that was flattened, if any.
    pub flattened: Option<String>,
    /// Files moved into the target.
    pub installed: usize,
    /// Existing settings files left untouched.
    pub settings_kept: usize,
    /// Orphans deleted from watched folders, relative to the target.
    pub orphans_removed: Vec<PathBuf>,
    /// Orphans kept because they are whitelisted.
    pub whitelisted: usize,
    /// Orphan deletions that failed and were skipped.
    pub deletion_failures: usize,
}

/// Reconciles a target directory against an archive.
pub struct ArchiveReconciler<'e> {
    extractor: &'e ExtractorChain,
    sink: &'e dyn ProgressSink,
}

impl<'e> ArchiveReconciler<'e> {
    /// Create a reconciler that reports nothing.
    pub fn new(extractor: &'e ExtractorChain) -> Self {
        Self {
            extractor,
            sink: &NoopSink,
        }
    }

    /// Report progress to `sink`.
    pub fn with_sink(mut self, sink: &'e dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    /// Reconcile `target_dir` against `archive`.
    ///
    /// Failures other than cancellation surface as `ExtractionFailed`.
    pub fn reconcile(
        &self,
        archive: &Path,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<ReconcileReport> {
        ensure_active(cancel)?;

        let parent = match target_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|e| ProvisionError::extraction(&parent, e.to_string()))?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| {
                ProvisionError::extraction(&parent, format!("cannot create staging area: {}", e))
            })?;
        debug!(staging = %staging.path().display(), "Created staging area");

        let result = self.reconcile_staged(archive, target_dir, staging.path(), cancel);

        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            warn!(staging = %staging_path.display(), error = %e, "Failed to remove staging area");
        }

        result.map_err(|e| match e {
            ProvisionError::Cancelled | ProvisionError::ExtractionFailed { .. } => e,
            other => ProvisionError::extraction(archive, other.to_string()),
        })
    }

    fn reconcile_staged(
        &self,
        archive: &Path,
        target_dir: &Path,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        info!(archive = %archive.display(), target = %target_dir.display(), "Extracting archive");
        self.sink
            .emit(ProgressEvent::new(EXTRACT_TASK, 0, 0).with_message("extracting"));
        let format = self.extractor.extract(archive, staging, cancel)?;
        debug!(format = ?format, "Extraction finished");
        ensure_active(cancel)?;

        let root = rules::effective_root(staging)
            .map_err(|e| ProvisionError::extraction(staging, e.to_string()))?;
        if root != staging {
            let name = root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            info!(folder = %name, "Flattening wrapper folder");
            report.flattened = Some(name);
        }

        // Enumerate fully before mutating the target
        let walk = walk_files(&root);
        if let Some(error) = walk.errors.first() {
            return Err(ProvisionError::extraction(
                staging,
                format!("cannot enumerate staged files: {}", error.message),
            ));
        }
        let source_files = walk.files;

        fs::create_dir_all(target_dir)
            .map_err(|e| ProvisionError::extraction(target_dir, e.to_string()))?;

        let total = source_files.len() as u64;
        for (index, relative) in source_files.iter().enumerate() {
            ensure_active(cancel)?;
            self.install_file(&root, target_dir, relative, &mut report)?;
            self.sink
                .emit(ProgressEvent::new(EXTRACT_TASK, index as u64 + 1, total));
        }

        let source_set: HashSet<&Path> = source_files.iter().map(PathBuf::as_path).collect();
        for folder in rules::WATCHED_FOLDERS {
            ensure_active(cancel)?;
            self.remove_orphans(target_dir, folder, &source_set, &mut report);
        }

        info!(
            target = %target_dir.display(),
            installed = report.installed,
            settings_kept = report.settings_kept,
            orphans_removed = report.orphans_removed.len(),
            whitelisted = report.whitelisted,
            "Reconciliation complete"
        );
        Ok(report)
    }

    fn install_file(
        &self,
        root: &Path,
        target_dir: &Path,
        relative: &Path,
        report: &mut ReconcileReport,
    ) -> ProvisionResult<()> {
        let source = root.join(relative);
        let dest = target_dir.join(relative);

        if rules::is_settings_path(relative) && dest.exists() {
            debug!(path = %relative.display(), "Keeping existing settings file");
            report.settings_kept += 1;
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ProvisionError::extraction(parent, e.to_string()))?;
        }
        remove_existing(&dest)?;
        move_file(&source, &dest)?;

        debug!(path = %relative.display(), "Installed file");
        report.installed += 1;
        Ok(())
    }

    fn remove_orphans(
        &self,
        target_dir: &Path,
        folder: &str,
        source: &HashSet<&Path>,
        report: &mut ReconcileReport,
    ) {
        let folder_path = target_dir.join(folder);
        if !folder_path.is_dir() {
            return;
        }

        for inner in walk_files(&folder_path).files {
            let relative = Path::new(folder).join(&inner);
            if source.contains(relative.as_path()) {
                continue;
            }
            if rules::is_whitelisted(&relative) {
                debug!(path = %relative.display(), "Keeping whitelisted file");
                report.whitelisted += 1;
                continue;
            }

            match fs::remove_file(target_dir.join(&relative)) {
                Ok(()) => {
                    debug!(path = %relative.display(), "Removed orphan");
                    report.orphans_removed.push(relative);
                }
                Err(e) => {
                    warn!(path = %relative.display(), error = %e, "Failed to remove orphan");
                    report.deletion_failures += 1;
                }
            }
        }
    }
}

fn remove_existing(dest: &Path) -> ProvisionResult<()> {
    let Ok(meta) = fs::symlink_metadata(dest) else {
        return Ok(());
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(dest)
    } else {
        fs::remove_file(dest)
    };
    result.map_err(|e| ProvisionError::extraction(dest, format!("cannot replace: {}", e)))
}

/// Rename, or copy and delete when the rename crosses filesystems.
fn move_file(source: &Path, dest: &Path) -> ProvisionResult<()> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest).map_err(|e| ProvisionError::extraction(dest, e.to_string()))?;
    if let Err(e) = fs::remove_file(source) {
        debug!(path = %source.display(), error = %e, "Staged copy left for staging cleanup");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_file, write_zip};
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        chain: ExtractorChain,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                chain: ExtractorChain::native_only(),
            }
        }

        fn target(&self) -> PathBuf {
            self.temp.path().join("instance")
        }

        fn archive(&self, entries: &[(&str, &[u8])]) -> PathBuf {
            let path = self.temp.path().join("pack.zip");
            write_zip(&path, entries);
            path
        }

        fn reconcile(&self, archive: &Path) -> ProvisionResult<ReconcileReport> {
            let token = CancellationToken::new();
            ArchiveReconciler::new(&self.chain).reconcile(archive, &self.target(), &token)
        }

        fn staging_leftovers(&self) -> usize {
            fs::read_dir(self.temp.path())
                .unwrap()
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
                .count()
        }
    }

    #[test]
    fn test_flattens_wrapper_folder() {
        let fx = Fixture::new();
        let archive = fx.archive(&[("MyPack/mods/a.jar", b"a"), ("MyPack/config/x.cfg", b"x")]);

        let report = fx.reconcile(&archive).unwrap();

        assert_eq!(report.flattened.as_deref(), Some("MyPack"));
        assert_eq!(fs::read(fx.target().join("mods/a.jar")).unwrap(), b"a");
        assert_eq!(fs::read(fx.target().join("config/x.cfg")).unwrap(), b"x");
        assert!(!fx.target().join("MyPack").exists());
        assert_eq!(fx.staging_leftovers(), 0);
    }

    #[test]
    fn test_orphans_and_whitelist() {
        let fx = Fixture::new();
        write_file(&fx.target(), "mods/old.jar", b"old");
        write_file(&fx.target(), "mods/figura-cape.jar", b"cape");
        write_file(&fx.target(), "saves/world/level.dat", b"save");
        let archive = fx.archive(&[("mods/a.jar", b"a")]);

        let report = fx.reconcile(&archive).unwrap();

        assert!(!fx.target().join("mods/old.jar").exists());
        assert!(fx.target().join("mods/figura-cape.jar").exists());
        assert!(fx.target().join("saves/world/level.dat").exists());
        assert_eq!(report.orphans_removed, vec![PathBuf::from("mods/old.jar")]);
        assert_eq!(report.whitelisted, 1);
    }

    #[test]
    fn test_keeps_existing_settings() {
        let fx = Fixture::new();
        write_file(&fx.target(), "options.txt", b"user settings");
        let archive = fx.archive(&[("options.txt", b"shipped"), ("mods/a.jar", b"a")]);

        let report = fx.reconcile(&archive).unwrap();

        assert_eq!(fs::read(fx.target().join("options.txt")).unwrap(), b"user settings");
        assert_eq!(report.settings_kept, 1);
    }

    #[test]
    fn test_installs_settings_when_absent() {
        let fx = Fixture::new();
        let archive = fx.archive(&[("options.txt", b"shipped")]);

        fx.reconcile(&archive).unwrap();

        assert_eq!(fs::read(fx.target().join("options.txt")).unwrap(), b"shipped");
    }

    #[test]
    fn test_overwrites_changed_files() {
        let fx = Fixture::new();
        write_file(&fx.target(), "mods/a.jar", b"v1");
        write_file(&fx.target(), "config/a", b"dir placeholder");
        let archive = fx.archive(&[("mods/a.jar", b"v2")]);

        fx.reconcile(&archive).unwrap();

        assert_eq!(fs::read(fx.target().join("mods/a.jar")).unwrap(), b"v2");
        // config is watched and `config/a` is not in the archive
        assert!(!fx.target().join("config/a").exists());
    }

    #[test]
    fn test_second_run_is_stable() {
        let fx = Fixture::new();
        let archive = fx.archive(&[
            ("mods/a.jar", b"a"),
            ("config/x.cfg", b"x"),
            ("options.txt", b"o"),
        ]);

        fx.reconcile(&archive).unwrap();
        let first = walk_files(&fx.target()).files;
        let report = fx.reconcile(&archive).unwrap();
        let second = walk_files(&fx.target()).files;

        assert_eq!(first, second);
        assert!(report.orphans_removed.is_empty());
        assert_eq!(report.settings_kept, 1);
    }

    #[test]
    fn test_bad_archive_cleans_staging() {
        let fx = Fixture::new();
        let archive = fx.temp.path().join("pack.zip");
        fs::write(&archive, b"PK\x03\x04broken").unwrap();

        let err = fx.reconcile(&archive).unwrap_err();

        assert!(matches!(err, ProvisionError::ExtractionFailed { .. }));
        assert_eq!(fx.staging_leftovers(), 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let fx = Fixture::new();
        let archive = fx.archive(&[("mods/a.jar", b"a")]);
        let token = CancellationToken::new();
        token.cancel();

        let err = ArchiveReconciler::new(&fx.chain)
            .reconcile(&archive, &fx.target(), &token)
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!fx.target().exists());
    }
}
