//! Archive extraction backends.
//!
//! Extraction is a strategy with two implementations:
//!
//! - [`ShellExtractor`]: runs the system `unzip` / `tar`, polled so it can be
//!   killed when the token fires
//! - [`NativeExtractor`]: in-process `zip` / `tar` + `flate2`, checking the
//!   token between entries
//!
//! [`ExtractorChain`] tries the primary backend when it supports the format
//! and falls back to the secondary one if the primary fails.

mod native;
mod shell;

pub use native::NativeExtractor;
pub use shell::ShellExtractor;

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::cancel::{ensure_active, CancellationToken};
use crate::error::{ProvisionError, ProvisionResult};

/// Supported archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// PKZIP archive.
    Zip,
    /// Gzip-compressed tarball.
    TarGz,
    /// Uncompressed tarball.
    Tar,
}

impl ArchiveFormat {
    /// Detect the format from magic bytes, falling back to the file name.
    pub fn detect(path: &Path) -> ProvisionResult<Self> {
        let mut header = [0u8; 262];
        let read = File::open(path)
            .and_then(|mut f| read_prefix(&mut f, &mut header))
            .map_err(|e| ProvisionError::extraction(path, format!("cannot read archive: {}", e)))?;

        Self::from_magic(&header[..read])
            .or_else(|| Self::from_name(path))
            .ok_or_else(|| ProvisionError::extraction(path, "unrecognized archive format"))
    }

    fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
            Some(Self::Zip)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else if header.len() >= 262 && &header[257..262] == b"ustar" {
            Some(Self::Tar)
        } else {
            None
        }
    }

    fn from_name(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".zip") || name.ends_with(".jar") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// An archive extraction backend.
pub trait ArchiveExtractor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this backend can handle `format` on this machine.
    fn supports(&self, format: ArchiveFormat) -> bool;

    /// Extract every entry of `archive` into `dest_dir`.
    ///
    /// Must return `Cancelled` promptly once the token fires.
    fn extract_all(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<()>;
}

/// Primary backend with a fallback.
pub struct ExtractorChain {
    primary: Box<dyn ArchiveExtractor>,
    fallback: Box<dyn ArchiveExtractor>,
}

impl Default for ExtractorChain {
    fn default() -> Self {
        Self::new(Box::new(ShellExtractor::new()), Box::new(NativeExtractor::new()))
    }
}

impl ExtractorChain {
    /// Create a chain from two backends.
    pub fn new(primary: Box<dyn ArchiveExtractor>, fallback: Box<dyn ArchiveExtractor>) -> Self {
        Self { primary, fallback }
    }

    /// Chain that only uses the in-process backend.
    pub fn native_only() -> Self {
        Self::new(Box::new(NativeExtractor::new()), Box::new(NativeExtractor::new()))
    }

    /// Detect the format of `archive` and extract it into `dest_dir`.
    pub fn extract(
        &self,
        archive: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<ArchiveFormat> {
        let format = ArchiveFormat::detect(archive)?;
        self.extract_all(archive, format, dest_dir, cancel)?;
        Ok(format)
    }
}

impl ArchiveExtractor for ExtractorChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn supports(&self, format: ArchiveFormat) -> bool {
        self.primary.supports(format) || self.fallback.supports(format)
    }

    fn extract_all(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<()> {
        ensure_active(cancel)?;
        fs::create_dir_all(dest_dir)
            .map_err(|e| ProvisionError::extraction(dest_dir, e.to_string()))?;

        if self.primary.supports(format) {
            match self.primary.extract_all(archive, format, dest_dir, cancel) {
                Ok(()) => return Ok(()),
                Err(ProvisionError::Cancelled) => return Err(ProvisionError::Cancelled),
                Err(e) => {
                    warn!(
                        archive = %archive.display(),
                        backend = self.primary.name(),
                        error = %e,
                        "Primary extraction failed, falling back"
                    );
                    clear_dir(dest_dir)?;
                }
            }
        } else {
            debug!(
                backend = self.primary.name(),
                format = ?format,
                "Primary extractor unavailable"
            );
        }

        ensure_active(cancel)?;
        self.fallback.extract_all(archive, format, dest_dir, cancel)
    }
}

/// Remove everything inside `dir`, keeping `dir` itself.
fn clear_dir(dir: &Path) -> ProvisionResult<()> {
    let entries = fs::read_dir(dir).map_err(|e| ProvisionError::extraction(dir, e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| ProvisionError::extraction(dir, e.to_string()))?;
        let path = entry.path();
        let result = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| ProvisionError::extraction(&path, e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_tar_gz, write_zip};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FailingExtractor {
        calls: Arc<AtomicUsize>,
    }

    impl ArchiveExtractor for FailingExtractor {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn supports(&self, _format: ArchiveFormat) -> bool {
            true
        }

        fn extract_all(
            &self,
            archive: &Path,
            _format: ArchiveFormat,
            dest_dir: &Path,
            _cancel: &CancellationToken,
        ) -> ProvisionResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::write(dest_dir.join("half-written"), b"junk").unwrap();
            Err(ProvisionError::extraction(archive, "simulated failure"))
        }
    }

    #[test]
    fn test_detect_by_magic() {
        let temp = TempDir::new().unwrap();
        let zip = temp.path().join("pack.bin");
        write_zip(&zip, &[("a.txt", b"a")]);
        assert_eq!(ArchiveFormat::detect(&zip).unwrap(), ArchiveFormat::Zip);

        let tgz = temp.path().join("runtime.bin");
        write_tar_gz(&tgz, &[("a.txt", b"a", 0o644)]);
        assert_eq!(ArchiveFormat::detect(&tgz).unwrap(), ArchiveFormat::TarGz);
    }

    #[test]
    fn test_detect_by_name() {
        assert_eq!(
            ArchiveFormat::from_name(Path::new("/x/jre.TAR.GZ")),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(ArchiveFormat::from_name(Path::new("a.tar")), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_name(Path::new("a.rar")), None);
    }

    #[test]
    fn test_detect_unknown() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.bin");
        fs::write(&path, b"plain text").unwrap();
        assert!(matches!(
            ArchiveFormat::detect(&path),
            Err(ProvisionError::ExtractionFailed { .. })
        ));
    }

    #[test]
    fn test_chain_falls_back_and_clears_partial_output() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("pack.zip");
        write_zip(&archive, &[("mods/a.jar", b"jar")]);
        let dest = temp.path().join("out");
        let calls = Arc::new(AtomicUsize::new(0));

        let chain = ExtractorChain::new(
            Box::new(FailingExtractor {
                calls: Arc::clone(&calls),
            }),
            Box::new(NativeExtractor::new()),
        );
        let token = CancellationToken::new();
        chain.extract(&archive, &dest, &token).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dest.join("half-written").exists());
        assert_eq!(fs::read(dest.join("mods/a.jar")).unwrap(), b"jar");
    }

    #[test]
    fn test_chain_cancelled_at_entry() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("pack.zip");
        write_zip(&archive, &[("a.txt", b"a")]);
        let token = CancellationToken::new();
        token.cancel();

        let err = ExtractorChain::native_only()
            .extract(&archive, &temp.path().join("out"), &token)
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
