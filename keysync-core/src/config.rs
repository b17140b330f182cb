//! YAML configuration at `~/.keysync/config.yaml`.
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths::{self, DEFAULT_SIGNAL_STALE_AFTER};
use crate::types::{PackageIdentifier, RepositoryMap};

/// Host + extension configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Repository URL → channel.
    #[serde(default)]
    pub repositories: RepositoryMap,
    /// Packages the user has enabled (one speller per enabled keyboard).
    #[serde(default)]
    pub packages: Vec<PackageIdentifier>,
    /// Override for the shared signal directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc_dir: Option<PathBuf>,
    /// Override for the package store prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_prefix: Option<PathBuf>,
    /// Consumers ignore signal files older than this. `0` disables the check.
    #[serde(default = "default_stale_after_secs")]
    pub signal_stale_after_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories: RepositoryMap::new(),
            packages: Vec::new(),
            ipc_dir: None,
            store_prefix: None,
            signal_stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_SIGNAL_STALE_AFTER.as_secs()
}

impl Config {
    /// Shared signal directory, honouring the override.
    pub fn ipc_dir_at(&self, home: &Path) -> PathBuf {
        self.ipc_dir
            .clone()
            .unwrap_or_else(|| paths::ipc_dir(home))
    }

    /// Package store prefix, honouring the override.
    pub fn store_prefix_at(&self, home: &Path) -> PathBuf {
        self.store_prefix
            .clone()
            .unwrap_or_else(|| paths::store_prefix(home))
    }

    pub fn signal_stale_after(&self) -> Option<Duration> {
        match self.signal_stale_after_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Add `package` to the enabled list. Returns `false` if it was already enabled.
    pub fn enable_package(&mut self, package: PackageIdentifier) -> bool {
        if self.packages.contains(&package) {
            return false;
        }
        self.packages.push(package);
        true
    }

    /// Add or replace a repository entry.
    pub fn add_repository(&mut self, url: impl Into<String>, channel: impl Into<String>) {
        self.repositories.insert(url.into(), channel.into());
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load `<home>/.keysync/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = paths::config_path(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Like [`load_at`], but a missing file yields [`Config::default`].
pub fn load_or_default_at(home: &Path) -> Result<Config, ConfigError> {
    match load_at(home) {
        Err(ConfigError::ConfigNotFound { .. }) => Ok(Config::default()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `<home>/.keysync/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    let root = paths::keysync_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = paths::config_path(home);
    let tmp_path = path.with_file_name(format!("{}.tmp", paths::CONFIG_FILE));

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
