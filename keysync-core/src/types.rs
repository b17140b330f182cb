//! Domain types for package synchronization.
//!
//! A [`PackageIdentifier`] is the only key that crosses the process boundary:
//! the host derives signal file names from it and the extension parses it back.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the repository URL and the package id inside an identifier.
const PACKAGES_SEGMENT: &str = "/packages/";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque key for an installable package, e.g.
/// `https://pahkat.example.org/repo/packages/speller-se?platform=ios`.
///
/// Equality and hashing are by the full string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageIdentifier(String);

impl PackageIdentifier {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build `<repository>/packages/<package>`.
    pub fn from_parts(repository: &str, package: &str) -> Self {
        Self(format!(
            "{}{PACKAGES_SEGMENT}{package}",
            repository.trim_end_matches('/')
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Repository URL part, if the identifier was built from one.
    pub fn repository(&self) -> Option<&str> {
        self.0
            .rsplit_once(PACKAGES_SEGMENT)
            .map(|(repository, _)| repository)
    }

    /// Bare package id with any query string removed.
    ///
    /// Identifiers without a repository part are returned whole.
    pub fn package_id(&self) -> &str {
        let tail = self
            .0
            .rsplit_once(PACKAGES_SEGMENT)
            .map(|(_, tail)| tail)
            .unwrap_or(&self.0);
        tail.split_once('?').map(|(id, _)| id).unwrap_or(tail)
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PackageIdentifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PackageIdentifier {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for PackageIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Repository URL → channel name.
pub type RepositoryMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Install state of a package as reported by the package store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    NotInstalled,
    UpToDate,
    RequiresUpdate,
    Unknown,
}

impl PackageStatus {
    /// Everything except `UpToDate` needs a download + install.
    pub fn requires_action(self) -> bool {
        !matches!(self, PackageStatus::UpToDate)
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageStatus::NotInstalled => write!(f, "not installed"),
            PackageStatus::UpToDate => write!(f, "up to date"),
            PackageStatus::RequiresUpdate => write!(f, "requires update"),
            PackageStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One step of an install transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "package", rename_all = "lowercase")]
pub enum TransactionAction {
    Install(PackageIdentifier),
    Uninstall(PackageIdentifier),
}

impl TransactionAction {
    pub fn package(&self) -> &PackageIdentifier {
        match self {
            TransactionAction::Install(id) | TransactionAction::Uninstall(id) => id,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
