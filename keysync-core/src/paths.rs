//! On-disk layout under `<home>/.keysync/`.
//!
//! ```text
//! ~/.keysync/
//!   config.yaml     enabled packages + repositories
//!   ipc/            shared signal directory (download-<id> files)
//!   pahkat/         package store prefix
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.yaml";
pub const IPC_DIR: &str = "ipc";
pub const STORE_DIR: &str = "pahkat";

/// Signal files older than this are ignored by consumers unless configured otherwise.
pub const DEFAULT_SIGNAL_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

pub fn keysync_root(home: &Path) -> PathBuf {
    home.join(".keysync")
}

pub fn config_path(home: &Path) -> PathBuf {
    keysync_root(home).join(CONFIG_FILE)
}

pub fn ipc_dir(home: &Path) -> PathBuf {
    keysync_root(home).join(IPC_DIR)
}

pub fn store_prefix(home: &Path) -> PathBuf {
    keysync_root(home).join(STORE_DIR)
}
