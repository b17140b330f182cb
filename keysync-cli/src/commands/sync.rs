//! `keysync sync`: one synchronization pass over the enabled packages.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use keysync_sync::{PrefixStore, SyncOrchestrator, SyncReport};

/// Arguments for `keysync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Suppress per-step progress lines.
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let (home, cfg) = super::load_config()?;
        if cfg.packages.is_empty() {
            println!("No packages enabled. Run `keysync init --package <id>` first.");
            return Ok(());
        }

        let prefix = cfg.store_prefix_at(&home);
        let store = PrefixStore::open_or_create(&prefix)
            .with_context(|| format!("cannot open package store at {}", prefix.display()))?;
        let orchestrator =
            SyncOrchestrator::new(store, super::signal_channel(&home, &cfg), cfg.repositories.clone());

        let quiet = self.quiet;
        let report = super::runtime()?
            .block_on(orchestrator.synchronize(&cfg.packages, |step| {
                if !quiet {
                    println!("  {} {step}", "·".dimmed());
                }
            }))
            .context("sync failed")?;

        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &SyncReport) {
    if report.cancelled {
        println!("{} install cancelled", "!".yellow());
        return;
    }
    if report.is_noop() {
        println!("{} all {} package(s) up to date", "✓".green(), report.up_to_date.len());
        return;
    }
    println!(
        "{} installed {} package(s), {} already up to date",
        "✓".green(),
        report.installed.len(),
        report.up_to_date.len()
    );
    for package in &report.installed {
        println!("  ✎  {package}");
    }
}
