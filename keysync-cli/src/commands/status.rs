//! `keysync status`: install state of the enabled packages.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use keysync_core::{PackageIdentifier, PackageStatus};
use keysync_sync::{PackageStore, PrefixStore, StoreError};

/// Arguments for `keysync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PackageRow {
    package: PackageIdentifier,
    status: PackageStatus,
    installed_version: Option<String>,
    downloading: bool,
}

#[derive(Serialize)]
struct StatusJson {
    packages: Vec<PackageRow>,
    in_flight: BTreeSet<PackageIdentifier>,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let (home, cfg) = super::load_config()?;
        let prefix = cfg.store_prefix_at(&home);
        let store = PrefixStore::open_or_create(&prefix)
            .with_context(|| format!("cannot open package store at {}", prefix.display()))?;
        let in_flight = match super::signal_channel(&home, &cfg).in_flight() {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "cannot list download signals");
                BTreeSet::new()
            }
        };

        let statuses = super::runtime()?
            .block_on(query(&store, &cfg.repositories, &cfg.packages))
            .context("failed to query package store")?;
        let installed = store.installed().context("failed to read store state")?;

        let rows: Vec<PackageRow> = statuses
            .into_iter()
            .map(|(package, status)| PackageRow {
                installed_version: installed
                    .installed
                    .get(&package)
                    .map(|entry| entry.version.clone()),
                downloading: in_flight.contains(&package),
                package,
                status,
            })
            .collect();

        if self.json {
            let payload = StatusJson {
                packages: rows,
                in_flight,
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
            return Ok(());
        }

        if rows.is_empty() {
            println!("No packages enabled. Run `keysync init --package <id>` first.");
            return Ok(());
        }
        for row in &rows {
            print_row(row);
        }
        Ok(())
    }
}

async fn query(
    store: &PrefixStore,
    repositories: &keysync_core::RepositoryMap,
    packages: &[PackageIdentifier],
) -> Result<Vec<(PackageIdentifier, PackageStatus)>, StoreError> {
    store.set_repositories(repositories).await?;
    store.refresh_repositories().await?;
    let mut statuses = Vec::with_capacity(packages.len());
    for package in packages {
        statuses.push((package.clone(), store.status(package).await?));
    }
    Ok(statuses)
}

fn print_row(row: &PackageRow) {
    let status = match row.status {
        PackageStatus::UpToDate => row.status.to_string().green(),
        PackageStatus::NotInstalled | PackageStatus::RequiresUpdate => {
            row.status.to_string().yellow()
        }
        PackageStatus::Unknown => row.status.to_string().red(),
    };
    let version = row.installed_version.as_deref().unwrap_or("-");
    let downloading = if row.downloading { "  ▶ downloading" } else { "" };
    println!("{:<40} {:<16} {}{}", row.package.to_string(), status, version, downloading);
}
