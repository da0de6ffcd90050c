//! CLI error type.

use bundlesync::ProvisionError;
use thiserror::Error;

/// Exit code used when the user interrupted the run.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Provision(#[from] ProvisionError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Provision(e) if e.is_cancelled() => EXIT_INTERRUPTED,
            _ => 1,
        }
    }
}
