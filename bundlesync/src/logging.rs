//! Tracing subscriber setup.
//!
//! Installs an env-filtered registry with a stderr layer and, when a log
//! directory is configured, a daily-rolling file layer. Timestamps are
//! local RFC 3339.

use std::fs;
use std::path::PathBuf;

use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ProvisionError, ProvisionResult};

/// Default filter directive.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default file name prefix for rolling logs.
pub const DEFAULT_LOG_FILE_PREFIX: &str = "bundlesync.log";

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rolling log files; stderr only when `None`.
    pub log_dir: Option<PathBuf>,
    /// File name prefix for rolling logs.
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            log_dir: None,
            file_prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
        }
    }
}

impl LoggingConfig {
    /// Set the filter directive.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Also write logs to daily files in `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Keeps the background log writer alive. Hold it until exit.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn level_filter(level: &str) -> ProvisionResult<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| ProvisionError::Config(format!("invalid log filter '{}': {}", level, e)))
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> ProvisionResult<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(LocalTime::new(Rfc3339))
        .with_target(false);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|e| ProvisionError::io(dir, e))?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTime::new(Rfc3339));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ProvisionError::Config(format!("logging already initialized: {}", e)))?;

    Ok(LoggingGuard { _file: guard })
}
