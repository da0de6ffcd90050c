//! Extraction through the system `unzip` and `tar` tools.

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{ArchiveExtractor, ArchiveFormat};
use crate::cancel::{CancellationToken, POLL_INTERVAL};
use crate::error::{ProvisionError, ProvisionResult};

/// Shell-based archive extractor.
///
/// The child process is polled rather than waited on so that it can be
/// killed when the token fires.
#[derive(Debug, Clone)]
pub struct ShellExtractor {
    poll_interval: Duration,
}

impl Default for ShellExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellExtractor {
    /// Create a shell extractor.
    pub fn new() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
        }
    }

    fn tool(format: ArchiveFormat) -> &'static str {
        match format {
            ArchiveFormat::Zip => "unzip",
            ArchiveFormat::TarGz | ArchiveFormat::Tar => "tar",
        }
    }

    fn command(format: ArchiveFormat, archive: &Path, dest_dir: &Path) -> Command {
        let mut command = Command::new(Self::tool(format));
        match format {
            ArchiveFormat::Zip => {
                command.arg("-o").arg("-q").arg(archive).arg("-d").arg(dest_dir);
            }
            ArchiveFormat::TarGz => {
                command.arg("-xzf").arg(archive).arg("-C").arg(dest_dir);
            }
            ArchiveFormat::Tar => {
                command.arg("-xf").arg(archive).arg("-C").arg(dest_dir);
            }
        }
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        command
    }
}

impl ArchiveExtractor for ShellExtractor {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn supports(&self, format: ArchiveFormat) -> bool {
        let tool = Self::tool(format);
        let probe_arg = match format {
            ArchiveFormat::Zip => "-v",
            ArchiveFormat::TarGz | ArchiveFormat::Tar => "--version",
        };

        let available = Command::new(tool)
            .arg(probe_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);

        debug!(tool, available, "Probed extraction tool");
        available
    }

    fn extract_all(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<()> {
        let tool = Self::tool(format);
        let mut child = Self::command(format, archive, dest_dir).spawn().map_err(|e| {
            ProvisionError::extraction(archive, format!("failed to run {}: {}", tool, e))
        })?;

        let status = loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                info!(
                    archive = %archive.display(),
                    tool,
                    "Extraction process killed on cancellation"
                );
                return Err(ProvisionError::Cancelled);
            }

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => {
                    let _ = child.kill();
                    return Err(ProvisionError::extraction(
                        archive,
                        format!("failed to wait for {}: {}", tool, e),
                    ));
                }
            }
        };

        if !status.success() {
            return Err(ProvisionError::extraction(
                archive,
                format!("{} exited with {}", tool, status),
            ));
        }

        debug!(archive = %archive.display(), tool, "Shell extraction complete");
        Ok(())
    }
}
