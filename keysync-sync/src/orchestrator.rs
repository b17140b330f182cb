//! One synchronization pass: resolve → check → download → install.
//!
//! Downloads run sequentially. Each one is bracketed by a signal file in the
//! shared IPC directory so another process can show progress; the file is
//! removed on every exit path, including when the `synchronize` future is
//! dropped mid-download.
//!
//! Only one pass runs per orchestrator. A call made while another pass is in
//! flight returns [`SyncError::AlreadyRunning`] without touching the store.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use keysync_core::{PackageIdentifier, PackageStatus, RepositoryMap, TransactionAction};
use keysync_ipc::SignalChannel;

use crate::error::SyncError;
use crate::session::{SyncPhase, SyncSession};
use crate::store::{DownloadProgress, PackageStore, TransactionEvent};

/// Outcome of a successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Packages handed to the install transaction.
    pub installed: Vec<PackageIdentifier>,
    pub up_to_date: Vec<PackageIdentifier>,
    /// The transaction was cancelled. Still a successful outcome.
    pub cancelled: bool,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.installed.is_empty()
    }
}

pub struct SyncOrchestrator<S> {
    store: S,
    signals: SignalChannel,
    repositories: RepositoryMap,
    syncing: AtomicBool,
}

impl<S: PackageStore> SyncOrchestrator<S> {
    pub fn new(store: S, signals: SignalChannel, repositories: RepositoryMap) -> Self {
        Self {
            store,
            signals,
            repositories,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn signals(&self) -> &SignalChannel {
        &self.signals
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Run one pass over `enabled`, reporting milestones to `on_progress`.
    pub async fn synchronize(
        &self,
        enabled: &[PackageIdentifier],
        on_progress: impl Fn(&str) + Send + Sync,
    ) -> Result<SyncReport, SyncError> {
        let Some(_running) = InFlight::acquire(&self.syncing) else {
            tracing::warn!("synchronization already in progress; rejecting");
            return Err(SyncError::AlreadyRunning);
        };

        let mut session = SyncSession::new(enabled);
        match self.run(&mut session, &on_progress).await {
            Ok(report) => {
                session.advance(SyncPhase::Completed);
                on_progress("done");
                tracing::info!(
                    installed = report.installed.len(),
                    up_to_date = report.up_to_date.len(),
                    cancelled = report.cancelled,
                    "synchronization completed"
                );
                Ok(report)
            }
            Err(err) => {
                session.advance(SyncPhase::Failed);
                tracing::error!(error = %err, "synchronization failed");
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        session: &mut SyncSession,
        on_progress: &(impl Fn(&str) + Send + Sync),
    ) -> Result<SyncReport, SyncError> {
        // Resolving
        on_progress("setting repositories");
        self.store
            .set_repositories(&self.repositories)
            .await
            .map_err(SyncError::Repository)?;
        on_progress("refreshing repositories");
        self.store
            .refresh_repositories()
            .await
            .map_err(SyncError::Repository)?;

        // Checking
        session.advance(SyncPhase::Checking);
        on_progress("checking packages");
        let mut report = SyncReport::default();
        for package in session.candidates().to_vec() {
            let status = self
                .store
                .status(&package)
                .await
                .map_err(SyncError::Repository)?;
            tracing::debug!(package = %package, status = %status, "package status");
            if status == PackageStatus::UpToDate {
                report.up_to_date.push(package);
            } else {
                session.mark_requires_action(package);
            }
        }
        if session.requires_action().is_empty() {
            tracing::info!("all packages up to date");
            return Ok(report);
        }

        // Downloading
        session.advance(SyncPhase::Downloading);
        for package in session.requires_action() {
            on_progress(&format!("downloading {}", package.package_id()));
            self.download(package).await?;
        }

        // Installing
        session.advance(SyncPhase::Installing);
        on_progress("installing packages");
        let actions: Vec<TransactionAction> = session
            .requires_action()
            .iter()
            .cloned()
            .map(TransactionAction::Install)
            .collect();
        report.cancelled = self.install(actions, on_progress).await?;
        report.installed = session.requires_action().to_vec();
        Ok(report)
    }

    async fn download(&self, package: &PackageIdentifier) -> Result<(), SyncError> {
        let _signal = SignalGuard::start(&self.signals, package);
        let progress = |p: DownloadProgress| {
            tracing::trace!(package = %package, downloaded = p.downloaded, total = ?p.total, "download progress");
        };
        let artifact = self
            .store
            .download(package, &progress)
            .await
            .map_err(|source| SyncError::Download {
                package: package.clone(),
                source,
            })?;
        tracing::info!(package = %package, artifact = %artifact.display(), "downloaded");
        Ok(())
    }

    /// Returns whether the transaction was cancelled.
    async fn install(
        &self,
        actions: Vec<TransactionAction>,
        on_progress: &(impl Fn(&str) + Send + Sync),
    ) -> Result<bool, SyncError> {
        let mut transaction =
            self.store
                .transaction(actions)
                .await
                .map_err(|err| SyncError::Transaction {
                    package: None,
                    message: err.to_string(),
                })?;
        tracing::info!(actions = transaction.actions().len(), "processing transaction");

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let processing = transaction.process(events_tx);
        let consuming = async {
            let mut outcome: Option<Result<bool, SyncError>> = None;
            while let Some(event) = events_rx.recv().await {
                if outcome.is_some() {
                    tracing::warn!(?event, "transaction event after terminal event ignored");
                    continue;
                }
                match event {
                    TransactionEvent::WillInstall(package) => {
                        on_progress(&format!("installing {}", package.package_id()));
                    }
                    TransactionEvent::WillUninstall(package) => {
                        on_progress(&format!("uninstalling {}", package.package_id()));
                    }
                    TransactionEvent::Unknown { package, code } => {
                        tracing::debug!(package = ?package, code, "unknown transaction event");
                    }
                    TransactionEvent::Completed => outcome = Some(Ok(false)),
                    TransactionEvent::Cancelled => {
                        tracing::info!("transaction cancelled");
                        outcome = Some(Ok(true));
                    }
                    TransactionEvent::Error { package, message } => {
                        outcome = Some(Err(SyncError::Transaction { package, message }));
                    }
                }
            }
            outcome
        };
        let ((), outcome) = tokio::join!(processing, consuming);

        outcome.unwrap_or_else(|| {
            Err(SyncError::Transaction {
                package: None,
                message: "transaction ended without a terminal event".to_string(),
            })
        })
    }
}

/// Holds the "sync in progress" flag; clears it on drop.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Signal file raised for the lifetime of one download.
struct SignalGuard<'a> {
    signals: &'a SignalChannel,
    package: &'a PackageIdentifier,
}

impl<'a> SignalGuard<'a> {
    fn start(signals: &'a SignalChannel, package: &'a PackageIdentifier) -> Self {
        if let Err(err) = signals.signal_start(package) {
            tracing::warn!(package = %package, error = %err, "cannot raise download signal");
        }
        Self { signals, package }
    }
}

impl Drop for SignalGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.signals.signal_finish(self.package) {
            tracing::warn!(package = %self.package, error = %err, "cannot clear download signal");
        }
    }
}
