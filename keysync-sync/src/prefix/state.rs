//! Installed-package state at `<prefix>/state.json`.
//!
//! Saved with the same `.tmp` + rename pattern as the config file.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use keysync_core::PackageIdentifier;

use crate::error::{io_err, json_err, StoreError};

pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub installed: BTreeMap<PackageIdentifier, InstalledPackage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub version: String,
    /// File name of the installed artifact inside the package directory.
    pub artifact: String,
    pub sha256: String,
    pub installed_at: DateTime<Utc>,
}

pub fn state_path(prefix: &Path) -> PathBuf {
    prefix.join(STATE_FILE)
}

/// Load the state, empty if the file does not exist yet.
pub fn load(prefix: &Path) -> Result<StoreState, StoreError> {
    let path = state_path(prefix);
    if !path.exists() {
        return Ok(StoreState::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_json::from_str(&contents).map_err(|e| json_err(&path, e))
}

pub fn save(prefix: &Path, state: &StoreState) -> Result<(), StoreError> {
    let path = state_path(prefix);
    std::fs::create_dir_all(prefix).map_err(|e| io_err(prefix, e))?;

    let json = serde_json::to_string_pretty(state).map_err(|e| json_err(&path, e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String, StoreError> {
    let mut file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
