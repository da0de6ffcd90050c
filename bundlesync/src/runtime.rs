//! Java runtime installation.
//!
//! A game version maps to a required runtime major version. Runtimes live
//! under `<runtime_dir>/java-<major>`; a missing one is downloaded with the
//! chunked downloader and unpacked with the archive reconciler.

use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use tracing::{debug, info, warn};

use crate::cancel::{ensure_active, CancellationToken};
use crate::download::{ChunkedDownloader, FetchOptions, TransferTarget};
use crate::error::{ProvisionError, ProvisionResult};
use crate::progress::{NoopSink, ProgressEvent, ProgressSink};
use crate::reconcile::ArchiveReconciler;

/// Progress label used for runtime installation.
pub const INSTALL_TASK: &str = "install";

/// Default download location, an Adoptium JRE build.
pub const DEFAULT_RUNTIME_URL_TEMPLATE: &str =
    "https://api.adoptium.net/v3/binary/latest/{major}/ga/{os}/{arch}/jre/hotspot/normal/eclipse";

/// Major version used for anything newer than the table, or unparsable.
const LATEST_MAJOR: u32 = 21;

/// `(first game version that no longer fits, runtime major)`, ascending.
const MAJOR_RULES: &[((u64, u64, u64), u32)] = &[
    ((1, 17, 0), 8),
    ((1, 18, 0), 16),
    ((1, 20, 5), 17),
];

#[cfg(windows)]
const JAVA_EXECUTABLE: &str = "java.exe";
#[cfg(not(windows))]
const JAVA_EXECUTABLE: &str = "java";

/// Parse a game version leniently (`1.20` becomes `1.20.0`, suffixes dropped).
fn parse_game_version(selector: &str) -> Option<Version> {
    let core = selector
        .trim()
        .split(|c: char| c == '-' || c == '+' || c == ' ')
        .next()
        .unwrap_or("");
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    Version::parse(&parts.join(".")).ok()
}

/// Runtime major version required by a game version.
pub fn required_major(selector: &str) -> u32 {
    let Some(version) = parse_game_version(selector) else {
        debug!(selector, "Unparsable version, using latest runtime");
        return LATEST_MAJOR;
    };

    MAJOR_RULES
        .iter()
        .find(|((major, minor, patch), _)| version < Version::new(*major, *minor, *patch))
        .map(|(_, runtime)| *runtime)
        .unwrap_or(LATEST_MAJOR)
}

/// Find a runtime executable inside `dir`.
///
/// Checks `bin/java` and the macOS bundle layout at the top level and one
/// directory below it.
pub fn probe_executable(dir: &Path) -> Option<PathBuf> {
    let direct = [
        dir.join("bin").join(JAVA_EXECUTABLE),
        dir.join("Contents/Home/bin").join(JAVA_EXECUTABLE),
    ];
    if let Some(found) = direct.into_iter().find(|p| p.is_file()) {
        return Some(found);
    }

    let mut children: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    children.sort();

    children.into_iter().find_map(|child| {
        [
            child.join("bin").join(JAVA_EXECUTABLE),
            child.join("Contents/Home/bin").join(JAVA_EXECUTABLE),
        ]
        .into_iter()
        .find(|p| p.is_file())
    })
}

fn platform_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "mac",
        other => other,
    }
}

fn platform_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "x86" => "x32",
        other => other,
    }
}

/// Expand `{major}`, `{os}` and `{arch}` in a URL template.
pub fn runtime_url(template: &str, major: u32) -> String {
    template
        .replace("{major}", &major.to_string())
        .replace("{os}", platform_os())
        .replace("{arch}", platform_arch())
}

/// Ensures a runtime of the required major version is installed.
pub struct RuntimeInstaller<'e> {
    downloader: ChunkedDownloader<'e>,
    reconciler: ArchiveReconciler<'e>,
    runtime_dir: PathBuf,
    url_template: String,
    sink: &'e dyn ProgressSink,
}

impl<'e> RuntimeInstaller<'e> {
    /// Create an installer rooted at `runtime_dir`.
    pub fn new(
        downloader: ChunkedDownloader<'e>,
        reconciler: ArchiveReconciler<'e>,
        runtime_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            reconciler,
            runtime_dir: runtime_dir.into(),
            url_template: DEFAULT_RUNTIME_URL_TEMPLATE.to_string(),
            sink: &NoopSink,
        }
    }

    /// Override the download URL template.
    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    /// Report progress to `sink`.
    pub fn with_sink(mut self, sink: &'e dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    /// Directory a runtime of `major` is installed into.
    pub fn install_dir(&self, major: u32) -> PathBuf {
        self.runtime_dir.join(format!("java-{}", major))
    }

    /// Return the runtime executable for `selector`, installing it if needed.
    pub fn ensure_runtime(
        &self,
        selector: &str,
        cancel: &CancellationToken,
    ) -> ProvisionResult<PathBuf> {
        let major = required_major(selector);
        let install_dir = self.install_dir(major);

        if let Some(executable) = probe_executable(&install_dir) {
            debug!(major, path = %executable.display(), "Runtime already installed");
            return Ok(executable);
        }

        ensure_active(cancel)?;
        info!(major, selector, dir = %install_dir.display(), "Installing runtime");

        let package = self.runtime_dir.join(format!(".java-{}.download", major));
        let result = self.install(major, &install_dir, &package, cancel);

        remove_path(&package);
        match result {
            Ok(executable) => {
                info!(major, path = %executable.display(), "Runtime installed");
                Ok(executable)
            }
            Err(e) => {
                remove_path(&install_dir);
                match e {
                    ProvisionError::Cancelled | ProvisionError::InstallFailed { .. } => Err(e),
                    other => Err(ProvisionError::InstallFailed {
                        major,
                        reason: other.to_string(),
                    }),
                }
            }
        }
    }

    fn install(
        &self,
        major: u32,
        install_dir: &Path,
        package: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<PathBuf> {
        if install_dir.exists() {
            debug!(dir = %install_dir.display(), "Removing partial runtime install");
            fs::remove_dir_all(install_dir).map_err(|e| ProvisionError::io(install_dir, e))?;
        }
        fs::create_dir_all(&self.runtime_dir)
            .map_err(|e| ProvisionError::io(&self.runtime_dir, e))?;

        let url = runtime_url(&self.url_template, major);
        let target = TransferTarget::new(url, package);
        let sink = self.sink;
        let progress = move |current: u64, total: u64| {
            sink.emit(ProgressEvent::new(INSTALL_TASK, current, total));
        };
        self.downloader
            .fetch_large(&target, &FetchOptions::new(cancel).with_progress(&progress))?;

        self.sink
            .emit(ProgressEvent::new(INSTALL_TASK, 0, 0).with_message("unpacking runtime"));
        self.reconciler.reconcile(package, install_dir, cancel)?;

        probe_executable(install_dir).ok_or_else(|| ProvisionError::InstallFailed {
            major,
            reason: format!("no {} found in {}", JAVA_EXECUTABLE, install_dir.display()),
        })
    }
}

fn remove_path(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to clean up runtime artifact");
    }
}
