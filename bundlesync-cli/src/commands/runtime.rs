//! `runtime` command: make sure a runtime for a game version is installed.

use bundlesync::runtime::required_major;
use bundlesync::ConfigFile;

use super::{build_engine, interrupt_token};
use crate::error::CliError;

pub fn run(version: &str, config: &ConfigFile) -> Result<(), CliError> {
    let (engine, bars) = build_engine(config)?;
    let token = interrupt_token()?;

    println!("Game version {} needs runtime {}", version, required_major(version));
    let result = engine.ensure_runtime(version, &token);
    bars.finish_all();

    let executable = result?;
    println!("{}", executable.display());
    Ok(())
}
