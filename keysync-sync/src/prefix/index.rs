//! Repository indexes.
//!
//! A repository is a directory reachable through a `file://` URL (or a plain
//! absolute path) holding `index.json`:
//!
//! ```json
//! { "packages": { "speller-se": { "version": "1.2.0", "artifact": "speller-se.zhfst" } } }
//! ```
//!
//! A channel-specific `index-<channel>.json` takes precedence when present.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, json_err, StoreError};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    #[serde(default)]
    pub packages: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub version: String,
    /// Artifact file, relative to the repository directory unless absolute.
    pub artifact: String,
}

/// An index loaded from disk together with the directory it came from.
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub dir: PathBuf,
    pub index: RepositoryIndex,
}

impl LoadedIndex {
    pub fn load(url: &str, channel: &str) -> Result<Self, StoreError> {
        let dir = repository_dir(url)?;
        let path = index_path(&dir, channel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let index = serde_json::from_str(&contents).map_err(|e| json_err(&path, e))?;
        tracing::debug!(repository = url, index = %path.display(), "loaded repository index");
        Ok(Self { dir, index })
    }

    pub fn entry(&self, package_id: &str) -> Option<&IndexEntry> {
        self.index.packages.get(package_id)
    }

    pub fn artifact_path(&self, entry: &IndexEntry) -> PathBuf {
        self.dir.join(&entry.artifact)
    }
}

/// Local directory behind a repository URL.
pub fn repository_dir(url: &str) -> Result<PathBuf, StoreError> {
    if let Some(rest) = url.strip_prefix("file://") {
        let decoded = urlencoding::decode(rest)
            .map_err(|_| StoreError::UnsupportedRepository(url.to_string()))?;
        return Ok(PathBuf::from(decoded.into_owned()));
    }
    let path = Path::new(url);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Err(StoreError::UnsupportedRepository(url.to_string()))
}

fn index_path(dir: &Path, channel: &str) -> PathBuf {
    if !channel.is_empty() {
        let channel_index = dir.join(format!("index-{channel}.json"));
        if channel_index.is_file() {
            return channel_index;
        }
    }
    dir.join(INDEX_FILE)
}
