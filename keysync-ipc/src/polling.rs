//! Snapshot-and-diff directory watcher.
//!
//! Used where event notification is unavailable: every tick the directory is
//! listed and compared with the previous listing.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Difference between two directory snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderChange {
    Added(PathBuf),
    Removed(PathBuf),
}

pub struct PollingWatcher {
    dir: PathBuf,
    interval: Duration,
    contents: BTreeSet<PathBuf>,
}

impl PollingWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_interval(dir, DEFAULT_POLL_INTERVAL)
    }

    /// Takes the baseline snapshot immediately; entries already present are
    /// never reported as added.
    pub fn with_interval(dir: impl Into<PathBuf>, interval: Duration) -> Self {
        let dir = dir.into();
        let contents = snapshot(&dir).unwrap_or_else(|err| {
            tracing::warn!(dir = %dir.display(), error = %err, "cannot list watched folder");
            BTreeSet::new()
        });
        Self {
            dir,
            interval,
            contents,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Entries seen at the last successful poll.
    pub fn contents(&self) -> &BTreeSet<PathBuf> {
        &self.contents
    }

    /// List the directory and return what changed since the last poll.
    ///
    /// A listing error other than "not found" is logged and yields no
    /// changes; the previous snapshot is kept.
    pub fn poll(&mut self) -> Vec<FolderChange> {
        let current = match snapshot(&self.dir) {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), error = %err, "cannot list watched folder");
                return Vec::new();
            }
        };
        let changes = diff(&self.contents, &current);
        self.contents = current;
        changes
    }

    /// Poll on a tokio interval until the returned handle is stopped or dropped.
    pub fn spawn(mut self) -> (PollingHandle, mpsc::UnboundedReceiver<FolderChange>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await; // consume the first immediate tick

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        for change in self.poll() {
                            if change_tx.send(change).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        (
            PollingHandle {
                shutdown: Some(shutdown_tx),
                task: Some(task),
            },
            change_rx,
        )
    }
}

/// Keeps a spawned [`PollingWatcher`] alive.
pub struct PollingHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PollingHandle {
    /// Stop polling and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Entries directly inside `dir`. A missing directory is empty.
pub fn snapshot(dir: &Path) -> std::io::Result<BTreeSet<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(err),
    };
    let mut contents = BTreeSet::new();
    for entry in entries {
        contents.insert(entry?.path());
    }
    Ok(contents)
}

/// Added entries first, then removed, each in path order.
pub fn diff(previous: &BTreeSet<PathBuf>, current: &BTreeSet<PathBuf>) -> Vec<FolderChange> {
    let added = current
        .difference(previous)
        .cloned()
        .map(FolderChange::Added);
    let removed = previous
        .difference(current)
        .cloned()
        .map(FolderChange::Removed);
    added.chain(removed).collect()
}
