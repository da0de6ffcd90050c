//! Orphan cleanup for a managed folder.
//!
//! Only the immediate children of the folder are considered. Anything not
//! in the keep set and not carrying a protected name is removed. Failures
//! are logged and counted, never returned.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::reconcile::rules::is_protected_name;

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Names removed.
    pub removed: Vec<String>,
    /// Entries kept because they are wanted.
    pub kept: usize,
    /// Entries kept because of a protected name.
    pub protected: usize,
    /// Removals that failed.
    pub failures: usize,
}

/// Remove every entry of `folder` whose name is neither in `keep` nor protected.
pub fn cleanup_orphans(folder: &Path, keep: &HashSet<String>) -> CleanupReport {
    let mut report = CleanupReport::default();

    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
        Err(e) => {
            warn!(folder = %folder.display(), error = %e, "Cannot list folder for cleanup");
            report.failures += 1;
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(folder = %folder.display(), error = %e, "Cannot read folder entry");
                report.failures += 1;
                continue;
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        if keep.contains(&name) {
            report.kept += 1;
            continue;
        }
        if is_protected_name(&name) {
            debug!(name = %name, "Keeping protected entry");
            report.protected += 1;
            continue;
        }

        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match result {
            Ok(()) => {
                debug!(name = %name, "Removed orphan");
                report.removed.push(name);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove orphan");
                report.failures += 1;
            }
        }
    }

    if !report.removed.is_empty() {
        info!(
            folder = %folder.display(),
            removed = report.removed.len(),
            "Orphan cleanup complete"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_file;
    use tempfile::TempDir;

    fn keep(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_folder_is_noop() {
        let temp = TempDir::new().unwrap();
        let report = cleanup_orphans(&temp.path().join("mods"), &keep(&[]));
        assert_eq!(report, CleanupReport::default());
    }

    #[test]
    fn test_removes_unwanted_children() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "wanted.jar", b"w");
        write_file(temp.path(), "stale.jar", b"s");
        write_file(temp.path(), "Figura-0.1.jar", b"f");
        write_file(temp.path(), "leftover/nested.txt", b"n");

        let report = cleanup_orphans(temp.path(), &keep(&["wanted.jar"]));

        assert!(temp.path().join("wanted.jar").exists());
        assert!(temp.path().join("Figura-0.1.jar").exists());
        assert!(!temp.path().join("stale.jar").exists());
        assert!(!temp.path().join("leftover").exists());
        assert_eq!(report.kept, 1);
        assert_eq!(report.protected, 1);
        assert_eq!(report.removed.len(), 2);
    }

    #[test]
    fn test_keep_names_match_exactly() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "A.jar", b"a");

        let report = cleanup_orphans(temp.path(), &keep(&["a.jar"]));

        assert_eq!(report.removed, vec!["A.jar".to_string()]);
    }

    #[test]
    fn test_only_immediate_children_are_judged() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "pack/inner-stale.jar", b"x");

        let report = cleanup_orphans(temp.path(), &keep(&["pack"]));

        assert!(temp.path().join("pack/inner-stale.jar").exists());
        assert!(report.removed.is_empty());
    }
}
