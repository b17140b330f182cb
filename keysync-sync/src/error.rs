//! Error types for keysync-sync.

use std::path::PathBuf;

use thiserror::Error;

use keysync_core::PackageIdentifier;

/// Errors raised by a [`PackageStore`](crate::PackageStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed repository index or store state.
    #[error("invalid JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported repository URL '{0}'")]
    UnsupportedRepository(String),

    #[error("package {0} not found in any configured repository")]
    PackageNotFound(PackageIdentifier),

    #[error("package {0} has not been downloaded")]
    NotDownloaded(PackageIdentifier),

    /// Failure reported by an external collaborator (network, daemon, …).
    #[error("{0}")]
    Other(String),
}

/// Outcome errors of a synchronization pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another pass is running on the same orchestrator.
    #[error("a synchronization pass is already running")]
    AlreadyRunning,

    /// Repository metadata could not be set, refreshed or queried.
    #[error("repository error: {0}")]
    Repository(#[source] StoreError),

    /// One package failed to download; nothing was installed.
    #[error("download of {package} failed: {source}")]
    Download {
        package: PackageIdentifier,
        #[source]
        source: StoreError,
    },

    /// The install transaction reported an error.
    #[error("install transaction failed: {message}")]
    Transaction {
        package: Option<PackageIdentifier>,
        message: String,
    },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn json_err(path: impl Into<PathBuf>, source: serde_json::Error) -> StoreError {
    StoreError::Json {
        path: path.into(),
        source,
    }
}
