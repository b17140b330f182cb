//! Error types for keysync-ipc.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to establish or run filesystem observation.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot create event source: {0}")]
    Init(#[source] notify::Error),

    #[error("cannot open {path} for watching: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("cannot spawn dispatch thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Signal-file bookkeeping errors.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watch error: {0}")]
    Watch(#[from] WatchError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SignalError {
    SignalError::Io {
        path: path.into(),
        source,
    }
}
