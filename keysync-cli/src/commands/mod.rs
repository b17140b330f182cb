//! Subcommand implementations.

pub mod init;
pub mod signal;
pub mod status;
pub mod sync;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};

use keysync_core::{config, Config};
use keysync_ipc::SignalChannel;

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Load the config, pointing at `keysync init` when it is missing.
pub(crate) fn load_config() -> Result<(PathBuf, Config)> {
    let home = home()?;
    let config = config::load_at(&home).context("failed to load config: run `keysync init` first")?;
    Ok((home, config))
}

/// Signal channel for the configured IPC directory.
pub(crate) fn signal_channel(home: &std::path::Path, config: &Config) -> SignalChannel {
    SignalChannel::new(config.ipc_dir_at(home)).with_stale_after(config.signal_stale_after())
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}
