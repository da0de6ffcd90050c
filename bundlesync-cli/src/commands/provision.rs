//! `provision` command: install or update a bundle into a directory.

use std::path::Path;

use bundlesync::{ConfigFile, ManagedBundle, ProvisionReport};
use tracing::info;

use super::{build_engine, interrupt_token};
use crate::error::CliError;

pub fn run(bundle_path: &Path, target: &Path, config: &ConfigFile) -> Result<(), CliError> {
    let bundle = ManagedBundle::load(bundle_path)?;
    let (engine, bars) = build_engine(config)?;
    let token = interrupt_token()?;

    info!(bundle = %bundle.id, target = %target.display(), "Starting provisioning");
    println!("Provisioning '{}' into {}", bundle.id, target.display());
    println!("Press Ctrl+C to cancel");
    println!();

    let result = engine.provision(&bundle, target, &token);
    bars.finish_all();

    let report = result?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ProvisionReport) {
    println!();
    println!("Bundle: {}", report.bundle_id);

    if let Some(ref archive) = report.archive {
        println!("Archive:");
        if let Some(ref folder) = archive.flattened {
            println!("  Flattened:        {}", folder);
        }
        println!("  Installed:        {}", archive.installed);
        println!("  Settings kept:    {}", archive.settings_kept);
        println!("  Orphans removed:  {}", archive.orphans_removed.len());
        println!("  Whitelisted:      {}", archive.whitelisted);
        if archive.deletion_failures > 0 {
            println!("  Delete failures:  {}", archive.deletion_failures);
        }
    }

    if let Some(ref items) = report.items {
        println!("Items:");
        println!("  Downloaded:       {}", items.downloaded.len());
        println!("  Already present:  {}", items.skipped.len());
        for failure in &items.failed {
            println!("  FAILED {}: {}", failure.url, failure.reason);
        }
    }

    let preload_total = report.preload_downloaded.len()
        + report.preload_skipped.len()
        + report.preload_failed.len();
    if preload_total > 0 {
        println!("Preload:");
        println!("  Downloaded:       {}", report.preload_downloaded.len());
        println!("  Up to date:       {}", report.preload_skipped.len());
        for failure in &report.preload_failed {
            println!("  FAILED {}: {}", failure.url, failure.reason);
        }
    }

    if let Some(ref cleanup) = report.cleanup {
        println!("Cleanup:");
        println!("  Removed:          {}", cleanup.removed.len());
        println!("  Protected:        {}", cleanup.protected);
    }
}
