//! In-process extraction with the `zip`, `tar` and `flate2` crates.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::{debug, warn};
use zip::ZipArchive;

use super::{ArchiveExtractor, ArchiveFormat};
use crate::cancel::{ensure_active, CancellationToken};
use crate::error::{ProvisionError, ProvisionResult};

/// In-process archive extractor.
///
/// Checks the token before every entry. Entries whose paths would escape
/// the destination are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeExtractor;

impl NativeExtractor {
    /// Create a native extractor.
    pub fn new() -> Self {
        Self
    }

    fn extract_zip(
        &self,
        archive: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<usize> {
        let file =
            File::open(archive).map_err(|e| ProvisionError::extraction(archive, e.to_string()))?;
        let mut zip = ZipArchive::new(BufReader::new(file))
            .map_err(|e| ProvisionError::extraction(archive, format!("invalid zip: {}", e)))?;

        let mut written = 0;
        for index in 0..zip.len() {
            ensure_active(cancel)?;

            let mut entry = zip
                .by_index(index)
                .map_err(|e| ProvisionError::extraction(archive, e.to_string()))?;

            let Some(relative) = entry.enclosed_name() else {
                warn!(
                    archive = %archive.display(),
                    entry = entry.name(),
                    "Skipping unsafe entry path"
                );
                continue;
            };
            let out_path = dest_dir.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&out_path)
                    .map_err(|e| ProvisionError::extraction(&out_path, e.to_string()))?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| ProvisionError::extraction(parent, e.to_string()))?;
            }

            let mut out = File::create(&out_path)
                .map_err(|e| ProvisionError::extraction(&out_path, e.to_string()))?;
            io::copy(&mut entry, &mut out)
                .map_err(|e| ProvisionError::extraction(&out_path, e.to_string()))?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))
                    .map_err(|e| ProvisionError::extraction(&out_path, e.to_string()))?;
            }

            written += 1;
        }

        Ok(written)
    }

    fn extract_tar(
        &self,
        archive: &Path,
        compressed: bool,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<usize> {
        let file =
            File::open(archive).map_err(|e| ProvisionError::extraction(archive, e.to_string()))?;
        let reader: Box<dyn Read> = if compressed {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut tarball = tar::Archive::new(reader);
        tarball.set_preserve_permissions(true);

        let entries = tarball
            .entries()
            .map_err(|e| ProvisionError::extraction(archive, format!("invalid tar: {}", e)))?;

        let mut written = 0;
        for entry in entries {
            ensure_active(cancel)?;

            let mut entry = entry.map_err(|e| ProvisionError::extraction(archive, e.to_string()))?;
            let unpacked = entry
                .unpack_in(dest_dir)
                .map_err(|e| ProvisionError::extraction(archive, e.to_string()))?;

            if unpacked {
                written += 1;
            } else {
                warn!(archive = %archive.display(), "Skipping entry outside destination");
            }
        }

        Ok(written)
    }
}

impl ArchiveExtractor for NativeExtractor {
    fn name(&self) -> &'static str {
        "native"
    }

    fn supports(&self, _format: ArchiveFormat) -> bool {
        true
    }

    fn extract_all(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<()> {
        let count = match format {
            ArchiveFormat::Zip => self.extract_zip(archive, dest_dir, cancel)?,
            ArchiveFormat::TarGz => self.extract_tar(archive, true, dest_dir, cancel)?,
            ArchiveFormat::Tar => self.extract_tar(archive, false, dest_dir, cancel)?,
        };

        debug!(archive = %archive.display(), entries = count, "Native extraction complete");
        Ok(())
    }
}
