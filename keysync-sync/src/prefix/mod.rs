//! Package store over a local prefix directory.
//!
//! Layout:
//!
//! ```text
//! <prefix>/
//!   cache/<encoded id>/<artifact>     downloaded, not yet installed
//!   staging/<txn>/new/<encoded id>/…  staged for install
//!   staging/<txn>/old/<encoded id>/…  replaced package, kept until commit
//!   pkg/<encoded id>/<artifact>       installed
//!   state.json                        version + sha256 per installed package
//! ```
//!
//! Install transactions stage every artifact before touching `pkg/`, then
//! swap the staged dirs in and save `state.json`. A failure at any point
//! leaves `pkg/` and `state.json` as they were.

pub mod index;
pub mod state;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, RwLock};

use keysync_core::{PackageIdentifier, PackageStatus, RepositoryMap, TransactionAction};

use crate::error::{io_err, StoreError};
use crate::store::{DownloadProgress, PackageStore, Transaction, TransactionEvent};

use self::index::{IndexEntry, LoadedIndex};
use self::state::{InstalledPackage, StoreState};

const CACHE_DIR: &str = "cache";
const STAGING_DIR: &str = "staging";
const PKG_DIR: &str = "pkg";
const STAGED_DIR: &str = "new";
const BACKUP_DIR: &str = "old";
const CHUNK_SIZE: usize = 64 * 1024;

pub struct PrefixStore {
    prefix: PathBuf,
    repositories: RwLock<RepositoryMap>,
    indexes: RwLock<BTreeMap<String, LoadedIndex>>,
    cancel: Arc<AtomicBool>,
}

impl PrefixStore {
    pub fn open_or_create(prefix: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let prefix = prefix.into();
        for dir in [CACHE_DIR, PKG_DIR] {
            let path = prefix.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| io_err(&path, e))?;
        }
        Ok(Self {
            prefix,
            repositories: RwLock::new(RepositoryMap::new()),
            indexes: RwLock::new(BTreeMap::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn installed(&self) -> Result<StoreState, StoreError> {
        state::load(&self.prefix)
    }

    /// Directory holding an installed package's files.
    pub fn package_dir(&self, package: &PackageIdentifier) -> PathBuf {
        self.prefix.join(PKG_DIR).join(encode(package))
    }

    /// Ask the next transaction to stop before it commits. It reports
    /// [`TransactionEvent::Cancelled`] instead of installing anything.
    pub fn cancel_transactions(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn cache_dir(&self, package: &PackageIdentifier) -> PathBuf {
        self.prefix.join(CACHE_DIR).join(encode(package))
    }

    /// Find `package` in the refreshed indexes. Identifiers carrying a
    /// repository URL only match that repository.
    async fn resolve(&self, package: &PackageIdentifier) -> Option<(LoadedIndex, IndexEntry)> {
        let indexes = self.indexes.read().await;
        let package_id = package.package_id();
        let lookup = |loaded: &LoadedIndex| {
            loaded
                .entry(package_id)
                .map(|entry| (loaded.clone(), entry.clone()))
        };
        match package.repository() {
            Some(url) => indexes.get(url).and_then(lookup),
            None => indexes.values().find_map(lookup),
        }
    }
}

#[async_trait]
impl PackageStore for PrefixStore {
    async fn set_repositories(&self, repositories: &RepositoryMap) -> Result<(), StoreError> {
        for url in repositories.keys() {
            index::repository_dir(url)?;
        }
        *self.repositories.write().await = repositories.clone();
        self.indexes.write().await.clear();
        tracing::debug!(count = repositories.len(), "repositories set");
        Ok(())
    }

    async fn refresh_repositories(&self) -> Result<(), StoreError> {
        let repositories = self.repositories.read().await.clone();
        let mut loaded = BTreeMap::new();
        for (url, channel) in &repositories {
            loaded.insert(url.clone(), LoadedIndex::load(url, channel)?);
        }
        *self.indexes.write().await = loaded;
        tracing::info!(count = repositories.len(), "repositories refreshed");
        Ok(())
    }

    async fn status(&self, package: &PackageIdentifier) -> Result<PackageStatus, StoreError> {
        let Some((_, entry)) = self.resolve(package).await else {
            return Ok(PackageStatus::Unknown);
        };
        let state = state::load(&self.prefix)?;
        Ok(match state.installed.get(package) {
            None => PackageStatus::NotInstalled,
            Some(installed) if installed.version == entry.version => PackageStatus::UpToDate,
            Some(_) => PackageStatus::RequiresUpdate,
        })
    }

    async fn download(
        &self,
        package: &PackageIdentifier,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<PathBuf, StoreError> {
        let (loaded, entry) = self
            .resolve(package)
            .await
            .ok_or_else(|| StoreError::PackageNotFound(package.clone()))?;
        let source = loaded.artifact_path(&entry);
        let dest_dir = self.cache_dir(package);
        tokio::fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| io_err(&dest_dir, e))?;
        let dest = dest_dir.join(artifact_file_name(&entry));
        let part = dest.with_extension("part");

        let mut reader = tokio::fs::File::open(&source)
            .await
            .map_err(|e| io_err(&source, e))?;
        let total = reader.metadata().await.ok().map(|m| m.len());
        let mut writer = tokio::fs::File::create(&part)
            .await
            .map_err(|e| io_err(&part, e))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut downloaded = 0u64;
        progress(DownloadProgress { downloaded, total });
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| io_err(&source, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| io_err(&part, e))?;
            downloaded += n as u64;
            progress(DownloadProgress { downloaded, total });
        }
        writer.flush().await.map_err(|e| io_err(&part, e))?;
        drop(writer);

        tokio::fs::rename(&part, &dest)
            .await
            .map_err(|e| io_err(&dest, e))?;
        tracing::debug!(package = %package, bytes = downloaded, "artifact cached");
        Ok(dest)
    }

    async fn transaction(
        &self,
        actions: Vec<TransactionAction>,
    ) -> Result<Box<dyn Transaction>, StoreError> {
        let mut plan = Vec::with_capacity(actions.len());
        for action in &actions {
            match action {
                TransactionAction::Install(package) => {
                    let (_, entry) = self
                        .resolve(package)
                        .await
                        .ok_or_else(|| StoreError::PackageNotFound(package.clone()))?;
                    let file_name = artifact_file_name(&entry);
                    let cached = self.cache_dir(package).join(&file_name);
                    if !cached.is_file() {
                        return Err(StoreError::NotDownloaded(package.clone()));
                    }
                    plan.push(Step::Install {
                        package: package.clone(),
                        version: entry.version,
                        file_name,
                        cached,
                    });
                }
                TransactionAction::Uninstall(package) => plan.push(Step::Uninstall {
                    package: package.clone(),
                }),
            }
        }
        Ok(Box::new(PrefixTransaction {
            prefix: self.prefix.clone(),
            actions,
            plan,
            cancel: Arc::clone(&self.cancel),
        }))
    }
}

#[derive(Debug, Clone)]
enum Step {
    Install {
        package: PackageIdentifier,
        version: String,
        file_name: String,
        cached: PathBuf,
    },
    Uninstall {
        package: PackageIdentifier,
    },
}

impl Step {
    fn package(&self) -> &PackageIdentifier {
        match self {
            Step::Install { package, .. } | Step::Uninstall { package } => package,
        }
    }
}

pub struct PrefixTransaction {
    prefix: PathBuf,
    actions: Vec<TransactionAction>,
    plan: Vec<Step>,
    cancel: Arc<AtomicBool>,
}

#[async_trait]
impl Transaction for PrefixTransaction {
    fn actions(&self) -> &[TransactionAction] {
        &self.actions
    }

    async fn process(&mut self, events: mpsc::UnboundedSender<TransactionEvent>) {
        let prefix = self.prefix.clone();
        let plan = self.plan.clone();
        let cancel = Arc::clone(&self.cancel);
        let fallback = events.clone();

        let run = tokio::task::spawn_blocking(move || run_plan(&prefix, &plan, &cancel, &events));
        if let Err(err) = run.await {
            let _ = fallback.send(TransactionEvent::Error {
                package: None,
                message: format!("transaction worker failed: {err}"),
            });
        }
    }
}

#[derive(Debug)]
struct StepFailure {
    package: Option<PackageIdentifier>,
    error: StoreError,
}

fn run_plan(
    prefix: &Path,
    plan: &[Step],
    cancel: &AtomicBool,
    events: &mpsc::UnboundedSender<TransactionEvent>,
) {
    let send = |event: TransactionEvent| {
        let _ = events.send(event);
    };
    if cancel.swap(false, Ordering::AcqRel) {
        send(TransactionEvent::Cancelled);
        return;
    }

    let staging = prefix
        .join(STAGING_DIR)
        .join(Utc::now().format("%Y%m%d%H%M%S%f").to_string());
    let outcome = stage(&staging, plan, &send).and_then(|staged| {
        if cancel.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        commit(prefix, &staging, plan, staged)?;
        Ok(true)
    });
    if staging.exists() {
        if let Err(err) = std::fs::remove_dir_all(&staging) {
            tracing::warn!(dir = %staging.display(), error = %err, "cannot remove staging directory");
        }
    }

    match outcome {
        Ok(true) => send(TransactionEvent::Completed),
        Ok(false) => send(TransactionEvent::Cancelled),
        Err(failure) => {
            tracing::warn!(package = ?failure.package, error = %failure.error, "transaction failed");
            send(TransactionEvent::Error {
                package: failure.package,
                message: failure.error.to_string(),
            });
        }
    }
}

/// Copy every install artifact into `staging`; returns sha256 per install step.
fn stage(
    staging: &Path,
    plan: &[Step],
    send: &impl Fn(TransactionEvent),
) -> Result<BTreeMap<PackageIdentifier, String>, StepFailure> {
    let mut digests = BTreeMap::new();
    for step in plan {
        let fail = |error| StepFailure {
            package: Some(step.package().clone()),
            error,
        };
        match step {
            Step::Install {
                package,
                file_name,
                cached,
                ..
            } => {
                send(TransactionEvent::WillInstall(package.clone()));
                let dir = staging.join(STAGED_DIR).join(encode(package));
                std::fs::create_dir_all(&dir).map_err(|e| fail(io_err(&dir, e)))?;
                let target = dir.join(file_name);
                std::fs::copy(cached, &target).map_err(|e| fail(io_err(cached, e)))?;
                digests.insert(package.clone(), state::sha256_file(&target).map_err(fail)?);
            }
            Step::Uninstall { package } => {
                send(TransactionEvent::WillUninstall(package.clone()));
            }
        }
    }
    Ok(digests)
}

/// Swap every staged package into `pkg/`, then save the state.
///
/// Replaced package dirs are moved to `<staging>/old/` first. Any failure,
/// including the state save, moves everything back; the backups go away with
/// the staging directory once the state is saved.
fn commit(
    prefix: &Path,
    staging: &Path,
    plan: &[Step],
    mut digests: BTreeMap<PackageIdentifier, String>,
) -> Result<(), StepFailure> {
    let unattributed = |error| StepFailure {
        package: None,
        error,
    };
    let mut state = state::load(prefix).map_err(unattributed)?;
    let mut journal = Vec::with_capacity(plan.len());

    let applied = apply_steps(prefix, staging, plan, &mut digests, &mut state, &mut journal)
        .and_then(|()| state::save(prefix, &state).map_err(unattributed));
    if let Err(failure) = applied {
        roll_back(&journal);
        return Err(failure);
    }

    for step in plan {
        match step {
            Step::Install {
                package,
                version,
                cached,
                ..
            } => {
                if let Err(err) = std::fs::remove_file(cached) {
                    tracing::debug!(path = %cached.display(), error = %err, "cached artifact not removed");
                }
                tracing::info!(package = %package, version = %version, "installed");
            }
            Step::Uninstall { package } => tracing::info!(package = %package, "uninstalled"),
        }
    }
    Ok(())
}

/// One `pkg/` entry touched by a commit.
#[derive(Debug)]
struct Swap {
    installed: PathBuf,
    backup: Option<PathBuf>,
    placed: bool,
}

fn apply_steps(
    prefix: &Path,
    staging: &Path,
    plan: &[Step],
    digests: &mut BTreeMap<PackageIdentifier, String>,
    state: &mut StoreState,
    journal: &mut Vec<Swap>,
) -> Result<(), StepFailure> {
    let backups = staging.join(BACKUP_DIR);
    for step in plan {
        let package = step.package();
        let fail = |error| StepFailure {
            package: Some(package.clone()),
            error,
        };
        let installed = prefix.join(PKG_DIR).join(encode(package));

        let mut swap = Swap {
            installed: installed.clone(),
            backup: None,
            placed: false,
        };
        if std::fs::symlink_metadata(&installed).is_ok() {
            std::fs::create_dir_all(&backups).map_err(|e| fail(io_err(&backups, e)))?;
            let backup = backups.join(encode(package));
            std::fs::rename(&installed, &backup).map_err(|e| fail(io_err(&installed, e)))?;
            swap.backup = Some(backup);
        }
        journal.push(swap);

        match step {
            Step::Install {
                version, file_name, ..
            } => {
                let sha256 = digests.remove(package).ok_or_else(|| {
                    fail(StoreError::Other(format!("no staged digest for {package}")))
                })?;
                let staged = staging.join(STAGED_DIR).join(encode(package));
                std::fs::rename(&staged, &installed).map_err(|e| fail(io_err(&staged, e)))?;
                if let Some(swap) = journal.last_mut() {
                    swap.placed = true;
                }
                state.installed.insert(
                    package.clone(),
                    InstalledPackage {
                        version: version.clone(),
                        artifact: file_name.clone(),
                        sha256,
                        installed_at: Utc::now(),
                    },
                );
            }
            Step::Uninstall { .. } => {
                state.installed.remove(package);
            }
        }
    }
    Ok(())
}

/// Undo `journal` newest first: drop what was placed, restore what was moved aside.
fn roll_back(journal: &[Swap]) {
    for swap in journal.iter().rev() {
        if swap.placed {
            if let Err(err) = remove_dir_if_present(&swap.installed) {
                tracing::warn!(path = %swap.installed.display(), error = %err, "rollback cannot remove new package");
                continue;
            }
        }
        if let Some(backup) = &swap.backup {
            if let Err(err) = std::fs::rename(backup, &swap.installed) {
                tracing::warn!(path = %swap.installed.display(), error = %err, "rollback cannot restore package");
            }
        }
    }
}

/// Remove a package dir, or a stray file in its place.
fn remove_dir_if_present(path: &Path) -> Result<(), StoreError> {
    let removed = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

fn encode(package: &PackageIdentifier) -> String {
    urlencoding::encode(package.as_str()).into_owned()
}

fn artifact_file_name(entry: &IndexEntry) -> String {
    Path::new(&entry.artifact)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.artifact.clone())
}
