//! Recursive file enumeration relative to a root.
//!
//! [`relative_files`] is lazy. Errors for individual subtrees are logged and
//! collected instead of stopping the walk, and can be inspected once the
//! iterator is exhausted.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// An error encountered while walking one subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkError {
    /// Path that could not be read, when known.
    pub path: Option<PathBuf>,
    /// What went wrong.
    pub message: String,
}

/// Every non-directory entry under a root plus the errors met on the way.
#[derive(Debug, Default)]
pub struct WalkReport {
    /// Paths relative to the root, in name order per directory.
    pub files: Vec<PathBuf>,
    /// Subtree errors.
    pub errors: Vec<WalkError>,
}

/// Lazy iterator over relative file paths.
///
/// Symlinks are yielded as entries and never followed.
pub struct RelativeFiles {
    root: PathBuf,
    inner: walkdir::IntoIter,
    errors: Vec<WalkError>,
}

impl RelativeFiles {
    /// Errors collected so far.
    pub fn errors(&self) -> &[WalkError] {
        &self.errors
    }

    /// Consume the iterator and return its collected errors.
    pub fn into_errors(self) -> Vec<WalkError> {
        self.errors
    }
}

impl Iterator for RelativeFiles {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            match self.inner.next()? {
                Ok(entry) => {
                    if entry.file_type().is_dir() {
                        continue;
                    }
                    match entry.path().strip_prefix(&self.root) {
                        Ok(relative) => return Some(relative.to_path_buf()),
                        Err(_) => continue,
                    }
                }
                Err(e) => {
                    let error = WalkError {
                        path: e.path().map(Path::to_path_buf),
                        message: e.to_string(),
                    };
                    warn!(
                        path = ?error.path,
                        error = %error.message,
                        "Skipping unreadable subtree"
                    );
                    self.errors.push(error);
                }
            }
        }
    }
}

/// Walk `root` lazily.
pub fn relative_files(root: &Path) -> RelativeFiles {
    RelativeFiles {
        root: root.to_path_buf(),
        inner: WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter(),
        errors: Vec::new(),
    }
}

/// Walk `root` to completion.
pub fn walk_files(root: &Path) -> WalkReport {
    let mut walk = relative_files(root);
    let files = walk.by_ref().collect();
    WalkReport {
        files,
        errors: walk.into_errors(),
    }
}
