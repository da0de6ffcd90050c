//! CLI subcommands.

pub mod config;
pub mod progress;
pub mod provision;
pub mod runtime;

use std::sync::Arc;

use bundlesync::{CancellationToken, ConfigFile, Engine};

use crate::error::CliError;
use progress::BarSink;

/// Build an engine from the config file with progress bars attached.
fn build_engine(config: &ConfigFile) -> Result<(Engine, Arc<BarSink>), CliError> {
    let sink = Arc::new(BarSink::new());
    let engine = Engine::from_config(config.to_engine_config())?.with_sink(sink.clone());
    Ok((engine, sink))
}

/// Token cancelled by Ctrl+C.
fn interrupt_token() -> Result<CancellationToken, CliError> {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, cancelling...");
        handler_token.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    Ok(token)
}
