//! keysync: package sync for keyboard spellers.
//!
//! # Usage
//!
//! ```text
//! keysync init --repo <url> [--channel <name>] --package <id>...
//! keysync sync
//! keysync watch [--poll]
//! keysync status [--json]
//! keysync signal start|finish <id>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    init::InitArgs, signal::SignalCommand, status::StatusArgs, sync::SyncArgs, watch::WatchArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "keysync",
    version,
    about = "Synchronize speller packages and follow in-flight downloads",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add repositories and enabled packages to the config.
    Init(InitArgs),

    /// Run one synchronization pass over the enabled packages.
    Sync(SyncArgs),

    /// Print download begin/finish notifications until interrupted.
    Watch(WatchArgs),

    /// Show install status of the enabled packages.
    Status(StatusArgs),

    /// Raise or clear a download signal by hand.
    Signal {
        #[command(subcommand)]
        command: SignalCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Watch(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Signal { command } => commands::signal::run(command),
    }
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the default `warn` level.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
