//! Configuration file and engine settings.
//!
//! Settings are stored in an INI file at `~/.bundlesync/config.ini`:
//!
//! ```ini
//! [download]
//! chunk_size = 10485760
//! chunk_concurrency = 4
//! chunk_retries = 3
//! retries = 3
//! retry_delay_ms = 1000
//! item_pool = 4
//! timeout_secs = 1800
//! connect_timeout_secs = 30
//!
//! [runtime]
//! dir = /home/user/.bundlesync/runtimes
//! url_template = https://example.invalid/{major}/{os}/{arch}
//!
//! [bundle]
//! content_folder = mods
//!
//! [logging]
//! level = info
//! dir = /home/user/.bundlesync/logs
//! ```
//!
//! Missing keys fall back to defaults. [`ConfigKey`] provides typed
//! `section.key` access for the command line.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;
use tracing::{debug, warn};

use crate::download::{
    DEFAULT_CHUNK_CONCURRENCY, DEFAULT_CHUNK_SIZE, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY,
};
use crate::error::{ProvisionError, ProvisionResult};
use crate::items::DEFAULT_ITEM_POOL;
use crate::logging::{LoggingConfig, DEFAULT_LOG_LEVEL};
use crate::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::runtime::DEFAULT_RUNTIME_URL_TEMPLATE;
use crate::transfer::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};

/// Folder inside the target directory that receives item files.
pub const DEFAULT_CONTENT_FOLDER: &str = "mods";

/// Whether `name` is a single plain folder name such as `mods`.
///
/// Rejects empty names, `.`, `..`, separators and drive prefixes.
pub fn is_folder_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Base directory for configuration and data (`~/.bundlesync`).
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bundlesync")
}

/// Path of the configuration file.
pub fn config_file_path() -> PathBuf {
    base_dir().join("config.ini")
}

/// Default directory for installed runtimes.
pub fn default_runtime_dir() -> PathBuf {
    base_dir().join("runtimes")
}

/// Resolved settings for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bytes per range in chunked downloads.
    pub chunk_size: u64,
    /// Concurrent range workers.
    pub chunk_concurrency: usize,
    /// Retries per range.
    pub chunk_retries: u32,
    /// Retries per whole-file download.
    pub retries: u32,
    /// Base delay for linear backoff.
    pub retry_delay: Duration,
    /// Minimum interval between byte progress reports.
    pub progress_interval: Duration,
    /// Worker threads for item sync.
    pub item_pool: usize,
    /// Whole-request HTTP timeout.
    pub request_timeout: Duration,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// Root directory for installed runtimes.
    pub runtime_dir: PathBuf,
    /// Runtime download URL with `{major}`, `{os}` and `{arch}` placeholders.
    pub runtime_url_template: String,
    /// Folder under the target that receives item files.
    pub content_folder: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_concurrency: DEFAULT_CHUNK_CONCURRENCY,
            chunk_retries: DEFAULT_RETRIES,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            item_pool: DEFAULT_ITEM_POOL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            runtime_dir: default_runtime_dir(),
            runtime_url_template: DEFAULT_RUNTIME_URL_TEMPLATE.to_string(),
            content_folder: DEFAULT_CONTENT_FOLDER.to_string(),
        }
    }
}

impl EngineConfig {
    /// Bytes per range, at least 1.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Concurrent range workers, at least 1.
    pub fn with_chunk_concurrency(mut self, concurrency: usize) -> Self {
        self.chunk_concurrency = concurrency.max(1);
        self
    }

    /// Retries per range.
    pub fn with_chunk_retries(mut self, retries: u32) -> Self {
        self.chunk_retries = retries;
        self
    }

    /// Retries per whole-file download.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Base delay for linear backoff.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Minimum interval between byte progress reports.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Item sync workers, at least 1.
    pub fn with_item_pool(mut self, pool: usize) -> Self {
        self.item_pool = pool.max(1);
        self
    }

    /// Root directory for installed runtimes.
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    /// Runtime download URL template.
    pub fn with_runtime_url_template(mut self, template: impl Into<String>) -> Self {
        self.runtime_url_template = template.into();
        self
    }

    /// Content folder under the target. Names that are not a single
    /// folder are ignored and the current value is kept.
    pub fn with_content_folder(mut self, folder: impl Into<String>) -> Self {
        let folder = folder.into();
        if is_folder_name(&folder) {
            self.content_folder = folder;
        } else {
            warn!(folder = %folder, "Ignoring invalid content folder");
        }
        self
    }
}

/// Download section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    pub chunk_size: u64,
    pub chunk_concurrency: usize,
    pub chunk_retries: u32,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub item_pool: usize,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_concurrency: DEFAULT_CHUNK_CONCURRENCY,
            chunk_retries: DEFAULT_RETRIES,
            retries: DEFAULT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            item_pool: DEFAULT_ITEM_POOL,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
        }
    }
}

/// Runtime section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Install root; the default location when `None`.
    pub dir: Option<PathBuf>,
    /// Download template; the Adoptium template when `None`.
    pub url_template: Option<String>,
}

/// Bundle section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSettings {
    pub content_folder: String,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            content_folder: DEFAULT_CONTENT_FOLDER.to_string(),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            dir: None,
        }
    }
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub download: DownloadSettings,
    pub runtime: RuntimeSettings,
    pub bundle: BundleSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from the default path. A missing file yields defaults.
    pub fn load() -> ProvisionResult<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> ProvisionResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| {
            ProvisionError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::default();
        for key in ConfigKey::all() {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                key.set(&mut config, value).map_err(|e| {
                    ProvisionError::Config(format!("{}: {}", path.display(), e))
                })?;
            }
        }
        Ok(config)
    }

    /// Save to the default path.
    pub fn save(&self) -> ProvisionResult<()> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating parent directories. Unset optional keys are omitted.
    pub fn save_to(&self, path: &Path) -> ProvisionResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section())).set(key.key_name(), value);
            }
        }

        ini.write_to_file(path).map_err(|e| ProvisionError::io(path, e))
    }

    /// Engine settings described by this file.
    pub fn to_engine_config(&self) -> EngineConfig {
        let download = &self.download;
        let mut config = EngineConfig::default()
            .with_chunk_size(download.chunk_size)
            .with_chunk_concurrency(download.chunk_concurrency)
            .with_chunk_retries(download.chunk_retries)
            .with_retries(download.retries)
            .with_retry_delay(Duration::from_millis(download.retry_delay_ms))
            .with_item_pool(download.item_pool)
            .with_content_folder(self.bundle.content_folder.clone());
        config.request_timeout = Duration::from_secs(download.timeout_secs);
        config.connect_timeout = Duration::from_secs(download.connect_timeout_secs);

        if let Some(ref dir) = self.runtime.dir {
            config = config.with_runtime_dir(dir.clone());
        }
        if let Some(ref template) = self.runtime.url_template {
            config = config.with_runtime_url_template(template.clone());
        }
        config
    }

    /// Logging settings described by this file.
    pub fn to_logging_config(&self) -> LoggingConfig {
        let config = LoggingConfig::default().with_level(self.logging.level.clone());
        match self.logging.dir {
            Some(ref dir) => config.with_log_dir(dir.clone()),
            None => config,
        }
    }
}

/// Error from a [`ConfigKey`] operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigKeyError {
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// A settable configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    DownloadChunkSize,
    DownloadChunkConcurrency,
    DownloadChunkRetries,
    DownloadRetries,
    DownloadRetryDelayMs,
    DownloadItemPool,
    DownloadTimeoutSecs,
    DownloadConnectTimeoutSecs,
    RuntimeDir,
    RuntimeUrlTemplate,
    BundleContentFolder,
    LoggingLevel,
    LoggingDir,
}

impl ConfigKey {
    /// Every key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::DownloadChunkSize,
            ConfigKey::DownloadChunkConcurrency,
            ConfigKey::DownloadChunkRetries,
            ConfigKey::DownloadRetries,
            ConfigKey::DownloadRetryDelayMs,
            ConfigKey::DownloadItemPool,
            ConfigKey::DownloadTimeoutSecs,
            ConfigKey::DownloadConnectTimeoutSecs,
            ConfigKey::RuntimeDir,
            ConfigKey::RuntimeUrlTemplate,
            ConfigKey::BundleContentFolder,
            ConfigKey::LoggingLevel,
            ConfigKey::LoggingDir,
        ]
    }

    /// INI section holding the key.
    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::DownloadChunkSize
            | ConfigKey::DownloadChunkConcurrency
            | ConfigKey::DownloadChunkRetries
            | ConfigKey::DownloadRetries
            | ConfigKey::DownloadRetryDelayMs
            | ConfigKey::DownloadItemPool
            | ConfigKey::DownloadTimeoutSecs
            | ConfigKey::DownloadConnectTimeoutSecs => "download",
            ConfigKey::RuntimeDir | ConfigKey::RuntimeUrlTemplate => "runtime",
            ConfigKey::BundleContentFolder => "bundle",
            ConfigKey::LoggingLevel | ConfigKey::LoggingDir => "logging",
        }
    }

    /// Key name within its section.
    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::DownloadChunkSize => "chunk_size",
            ConfigKey::DownloadChunkConcurrency => "chunk_concurrency",
            ConfigKey::DownloadChunkRetries => "chunk_retries",
            ConfigKey::DownloadRetries => "retries",
            ConfigKey::DownloadRetryDelayMs => "retry_delay_ms",
            ConfigKey::DownloadItemPool => "item_pool",
            ConfigKey::DownloadTimeoutSecs => "timeout_secs",
            ConfigKey::DownloadConnectTimeoutSecs => "connect_timeout_secs",
            ConfigKey::RuntimeDir => "dir",
            ConfigKey::RuntimeUrlTemplate => "url_template",
            ConfigKey::BundleContentFolder => "content_folder",
            ConfigKey::LoggingLevel => "level",
            ConfigKey::LoggingDir => "dir",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as a string; empty when an optional key is unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        let d = &config.download;
        match self {
            ConfigKey::DownloadChunkSize => d.chunk_size.to_string(),
            ConfigKey::DownloadChunkConcurrency => d.chunk_concurrency.to_string(),
            ConfigKey::DownloadChunkRetries => d.chunk_retries.to_string(),
            ConfigKey::DownloadRetries => d.retries.to_string(),
            ConfigKey::DownloadRetryDelayMs => d.retry_delay_ms.to_string(),
            ConfigKey::DownloadItemPool => d.item_pool.to_string(),
            ConfigKey::DownloadTimeoutSecs => d.timeout_secs.to_string(),
            ConfigKey::DownloadConnectTimeoutSecs => d.connect_timeout_secs.to_string(),
            ConfigKey::RuntimeDir => path_string(config.runtime.dir.as_deref()),
            ConfigKey::RuntimeUrlTemplate => {
                config.runtime.url_template.clone().unwrap_or_default()
            }
            ConfigKey::BundleContentFolder => config.bundle.content_folder.clone(),
            ConfigKey::LoggingLevel => config.logging.level.clone(),
            ConfigKey::LoggingDir => path_string(config.logging.dir.as_deref()),
        }
    }

    /// Parse and store `value`. An empty value clears optional keys.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigKeyError> {
        let value = value.trim();
        let d = &mut config.download;
        match self {
            ConfigKey::DownloadChunkSize => d.chunk_size = self.parse_positive(value)?,
            ConfigKey::DownloadChunkConcurrency => {
                d.chunk_concurrency = self.parse_positive(value)?
            }
            ConfigKey::DownloadChunkRetries => d.chunk_retries = self.parse_number(value)?,
            ConfigKey::DownloadRetries => d.retries = self.parse_number(value)?,
            ConfigKey::DownloadRetryDelayMs => d.retry_delay_ms = self.parse_number(value)?,
            ConfigKey::DownloadItemPool => d.item_pool = self.parse_positive(value)?,
            ConfigKey::DownloadTimeoutSecs => d.timeout_secs = self.parse_positive(value)?,
            ConfigKey::DownloadConnectTimeoutSecs => {
                d.connect_timeout_secs = self.parse_positive(value)?
            }
            ConfigKey::RuntimeDir => config.runtime.dir = optional(value).map(PathBuf::from),
            ConfigKey::RuntimeUrlTemplate => {
                if !value.is_empty() && !value.contains("{major}") {
                    return Err(self.invalid(value, "template must contain {major}"));
                }
                config.runtime.url_template = optional(value).map(str::to_string);
            }
            ConfigKey::BundleContentFolder => {
                if !is_folder_name(value) {
                    return Err(self.invalid(value, "expected a single folder name"));
                }
                config.bundle.content_folder = value.to_string();
            }
            ConfigKey::LoggingLevel => {
                if value.is_empty() {
                    return Err(self.invalid(value, "level cannot be empty"));
                }
                config.logging.level = value.to_string();
            }
            ConfigKey::LoggingDir => config.logging.dir = optional(value).map(PathBuf::from),
        }
        Ok(())
    }

    fn parse_number<T>(&self, value: &str) -> Result<T, ConfigKeyError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        value.parse().map_err(|e: T::Err| self.invalid(value, &e.to_string()))
    }

    fn parse_positive<T>(&self, value: &str) -> Result<T, ConfigKeyError>
    where
        T: FromStr + Default + PartialEq,
        T::Err: fmt::Display,
    {
        let parsed: T = self.parse_number(value)?;
        if parsed == T::default() {
            return Err(self.invalid(value, "must be greater than zero"));
        }
        Ok(parsed)
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigKeyError {
        ConfigKeyError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigKeyError::UnknownKey(s.to_string()))
    }
}

fn optional(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn path_string(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}
