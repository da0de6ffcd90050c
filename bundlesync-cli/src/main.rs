//! Bundlesync CLI
//!
//! Provisions content bundles from the command line.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use bundlesync::logging::init_logging;
use bundlesync::ConfigFile;
use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "bundlesync", version, about = "Provision and reconcile content bundles")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install or update a bundle into a directory
    Provision {
        /// Bundle descriptor (JSON)
        bundle: PathBuf,

        /// Installation directory
        #[arg(short, long)]
        target: PathBuf,
    },

    /// Make sure a runtime for a game version is installed
    Runtime {
        /// Game version, e.g. 1.20.1
        version: String,
    },

    /// View or change settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match cli.command {
        // Config commands must work even when the file does not parse
        Commands::Config(_) => ConfigFile::load().unwrap_or_default(),
        _ => ConfigFile::load()?,
    };

    let mut logging = config.to_logging_config();
    if cli.verbose {
        logging = logging.with_level("debug");
    }
    let _guard = init_logging(&logging)?;

    match cli.command {
        Commands::Provision { bundle, target } => {
            commands::provision::run(&bundle, &target, &config)
        }
        Commands::Runtime { version } => commands::runtime::run(&version, &config),
        Commands::Config(command) => commands::config::run(command),
    }
}
