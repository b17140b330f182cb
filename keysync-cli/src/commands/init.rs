//! `keysync init --repo <url> [--channel <name>] --package <id>...`

use anyhow::{Context, Result};
use clap::Args;

use keysync_core::{config, paths, PackageIdentifier};

/// Add repositories and enabled packages to `~/.keysync/config.yaml`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Repository URL (`file://…` or an absolute path). Repeatable.
    #[arg(long = "repo", short = 'r', value_name = "URL")]
    pub repos: Vec<String>,

    /// Channel used for every `--repo` given in this call.
    #[arg(long, short = 'c', default_value = "stable")]
    pub channel: String,

    /// Package identifier to enable. Repeatable.
    #[arg(long = "package", short = 'p', value_name = "ID")]
    pub packages: Vec<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let mut cfg = config::load_or_default_at(&home).context("failed to read existing config")?;

        for repo in &self.repos {
            cfg.add_repository(repo.clone(), self.channel.clone());
        }
        let mut added = 0;
        for package in self.packages {
            if cfg.enable_package(PackageIdentifier::from(package)) {
                added += 1;
            }
        }

        config::save_at(&home, &cfg).context("failed to save config")?;

        println!(
            "✓ {} repositor{}, {} package{} enabled ({} new)",
            cfg.repositories.len(),
            if cfg.repositories.len() == 1 { "y" } else { "ies" },
            cfg.packages.len(),
            if cfg.packages.len() == 1 { "" } else { "s" },
            added
        );
        println!("  Saved to: {}", paths::config_path(&home).display());
        Ok(())
    }
}
