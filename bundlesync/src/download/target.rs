//! Download targets.

use std::path::{Path, PathBuf};

/// One resource to fetch and the local path it lands at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    /// Remote address.
    pub url: String,
    /// Final local path.
    pub destination: PathBuf,
    /// Size the caller already knows, if any.
    pub expected_size: Option<u64>,
}

impl TransferTarget {
    /// Create a target with no known size.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            expected_size: None,
        }
    }

    /// Attach a known size.
    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Destination file name, used in progress labels and logs.
    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.url.clone())
    }

    /// Sibling path used while the transfer is in flight.
    pub fn partial_path(&self) -> PathBuf {
        partial_path(&self.destination)
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path() {
        let target = TransferTarget::new("https://example.com/a.zip", "/tmp/dl/a.zip");
        assert_eq!(target.partial_path(), PathBuf::from("/tmp/dl/a.zip.part"));
        assert_eq!(target.file_name(), "a.zip");
    }

    #[test]
    fn test_expected_size() {
        let target = TransferTarget::new("u", "/tmp/x").with_expected_size(42);
        assert_eq!(target.expected_size, Some(42));
    }
}
