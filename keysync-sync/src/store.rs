//! Package-store collaborator interface.
//!
//! The orchestrator treats download and install as opaque operations of a
//! [`PackageStore`]. Downloads are plain futures (dropping one cancels it);
//! install transactions report their lifecycle as [`TransactionEvent`]s.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use keysync_core::{PackageIdentifier, PackageStatus, RepositoryMap, TransactionAction};

use crate::error::StoreError;

/// Byte progress of one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.downloaded as f64 / total as f64),
            None => None,
        }
    }
}

/// Lifecycle of an install transaction.
///
/// `WillInstall` / `WillUninstall` / `Unknown` are informational. Exactly one
/// of `Completed`, `Cancelled` or `Error` ends the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    WillInstall(PackageIdentifier),
    WillUninstall(PackageIdentifier),
    Completed,
    Cancelled,
    Error {
        package: Option<PackageIdentifier>,
        message: String,
    },
    Unknown {
        package: Option<PackageIdentifier>,
        code: u32,
    },
}

impl TransactionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionEvent::Completed | TransactionEvent::Cancelled | TransactionEvent::Error { .. }
        )
    }
}

/// A prepared all-or-nothing set of actions.
#[async_trait]
pub trait Transaction: Send {
    fn actions(&self) -> &[TransactionAction];

    /// Run the transaction, sending its events to `events`.
    async fn process(&mut self, events: mpsc::UnboundedSender<TransactionEvent>);
}

#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn set_repositories(&self, repositories: &RepositoryMap) -> Result<(), StoreError>;

    async fn refresh_repositories(&self) -> Result<(), StoreError>;

    async fn status(&self, package: &PackageIdentifier) -> Result<PackageStatus, StoreError>;

    /// Fetch `package`, returning the downloaded artifact's path.
    async fn download(
        &self,
        package: &PackageIdentifier,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<PathBuf, StoreError>;

    async fn transaction(
        &self,
        actions: Vec<TransactionAction>,
    ) -> Result<Box<dyn Transaction>, StoreError>;
}
