//! `keysync signal start|finish <id>`: manual producer side of the signal protocol.

use anyhow::{Context, Result};
use clap::Subcommand;

use keysync_core::{config, PackageIdentifier};

#[derive(Subcommand, Debug)]
pub enum SignalCommand {
    /// Create the signal file for a package.
    Start {
        /// Package identifier.
        id: String,
    },
    /// Remove the signal file for a package.
    Finish {
        /// Package identifier.
        id: String,
    },
}

pub fn run(command: SignalCommand) -> Result<()> {
    let home = super::home()?;
    let cfg = config::load_or_default_at(&home).context("failed to read config")?;
    let channel = super::signal_channel(&home, &cfg);

    match command {
        SignalCommand::Start { id } => {
            let id = PackageIdentifier::from(id);
            channel
                .signal_start(&id)
                .with_context(|| format!("cannot raise signal for {id}"))?;
            println!("▶ {}", channel.signal_path(&id).display());
        }
        SignalCommand::Finish { id } => {
            let id = PackageIdentifier::from(id);
            channel
                .signal_finish(&id)
                .with_context(|| format!("cannot clear signal for {id}"))?;
            println!("■ {id}");
        }
    }
    Ok(())
}
