//! `download-<id>` sentinel files as a cross-process lifecycle protocol.
//!
//! # Wire encoding
//!
//! ```text
//! <ipc dir>/
//!   download-<percent-encoded package id>   (empty; present = in flight)
//! ```
//!
//! The host calls [`SignalChannel::signal_start`] before a download and
//! [`SignalChannel::signal_finish`] after it, whatever the outcome. The
//! extension subscribes and gets `on_begin` when a file appears and
//! `on_finish` when it disappears.
//!
//! Consumers never count events. Every event for a signal file re-checks the
//! file's existence against the set of ids believed in flight, so duplicated
//! or coalesced OS notifications converge on the on-disk state. An event for
//! the directory itself re-reads the whole listing.
//!
//! Callbacks for one subscription never run concurrently, so `on_begin` and
//! `on_finish` for an id arrive in the order the transitions were decided.
//!
//! A producer that dies mid-download leaves its file behind. With
//! `stale_after` set, files whose mtime is older than that are treated as
//! absent, and the subscription re-reads the directory at least every
//! [`STALE_RESCAN_INTERVAL`] so an aged file still produces `on_finish`.
//! Nothing else is recovered.

use std::collections::{BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use keysync_core::PackageIdentifier;
use tokio::sync::mpsc;

use crate::error::{io_err, SignalError};
use crate::event::{ChangeKind, Interest};
use crate::source::{EventSource, ManualSource, ManualTrigger, NotifySource};
use crate::watcher::{lock, EventWatcher};

pub const SIGNAL_PREFIX: &str = "download-";

/// Longest gap between directory rescans when `stale_after` is set.
pub const STALE_RESCAN_INTERVAL: Duration = Duration::from_secs(1);

/// File name for `id`. Ids are percent-encoded so URL identifiers stay one path segment.
pub fn signal_file_name(id: &PackageIdentifier) -> String {
    format!("{SIGNAL_PREFIX}{}", urlencoding::encode(id.as_str()))
}

/// Inverse of [`signal_file_name`]; `None` for anything that is not a signal file.
pub fn parse_signal_file_name(name: &str) -> Option<PackageIdentifier> {
    let encoded = name.strip_prefix(SIGNAL_PREFIX)?;
    if encoded.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(encoded).ok()?;
    Some(PackageIdentifier::new(decoded.into_owned()))
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Shared signal directory, used by both sides.
#[derive(Debug, Clone)]
pub struct SignalChannel {
    dir: PathBuf,
    stale_after: Option<Duration>,
}

impl SignalChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stale_after: None,
        }
    }

    /// Ignore signal files older than `stale_after` on the consumer side.
    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn signal_path(&self, id: &PackageIdentifier) -> PathBuf {
        self.dir.join(signal_file_name(id))
    }

    /// Create `download-<id>`, creating the directory if needed.
    ///
    /// An existing file is rewritten, which refreshes its mtime.
    pub fn signal_start(&self, id: &PackageIdentifier) -> Result<(), SignalError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let path = self.signal_path(id);
        std::fs::write(&path, b"").map_err(|e| io_err(&path, e))?;
        tracing::debug!(package = %id, path = %path.display(), "signalled download start");
        Ok(())
    }

    /// Remove `download-<id>`. Removing an absent file succeeds.
    pub fn signal_finish(&self, id: &PackageIdentifier) -> Result<(), SignalError> {
        let path = self.signal_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&path, err)),
        }
        tracing::debug!(package = %id, path = %path.display(), "signalled download finish");
        Ok(())
    }

    /// Whether a live signal file exists for `id`.
    pub fn is_in_flight(&self, id: &PackageIdentifier) -> bool {
        is_live(&self.signal_path(id), self.stale_after)
    }

    /// Ids with a live signal file right now.
    pub fn in_flight(&self) -> Result<BTreeSet<PackageIdentifier>, SignalError> {
        list_signals(&self.dir, self.stale_after)
    }

    /// Observe the directory with the platform watcher.
    ///
    /// Signal files already present are reported through `on_begin` before
    /// this returns. Later callbacks run on the watcher's dispatch thread.
    pub fn subscribe(&self, subscriber: SignalSubscriber) -> Result<SignalSubscription, SignalError> {
        let (subscription, ()) = self.attach(subscriber, |callback| {
            Ok((EventWatcher::new(callback)?, ()))
        })?;
        Ok(subscription)
    }

    /// Closure-based form of [`subscribe`](Self::subscribe).
    pub fn watch_signals(
        &self,
        on_begin: impl Fn(&PackageIdentifier) + Send + Sync + 'static,
        on_finish: impl Fn(&PackageIdentifier) + Send + Sync + 'static,
    ) -> Result<SignalSubscription, SignalError> {
        self.subscribe(SignalSubscriber::new(on_begin, on_finish))
    }

    /// Subscribe through a [`ManualSource`]; events are fired with the returned trigger.
    pub fn subscribe_manual(
        &self,
        subscriber: SignalSubscriber,
    ) -> Result<(SignalSubscription<ManualSource>, ManualTrigger), SignalError> {
        self.attach(subscriber, |callback| Ok(EventWatcher::manual(callback)))
    }

    fn attach<S: EventSource, T>(
        &self,
        subscriber: SignalSubscriber,
        build: impl FnOnce(
            Box<dyn Fn(ChangeKind, &Path) + Send + Sync>,
        ) -> Result<(EventWatcher<S>, T), SignalError>,
    ) -> Result<(SignalSubscription<S>, T), SignalError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let dir = std::fs::canonicalize(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let translator = Arc::new(SignalTranslator {
            dir: dir.clone(),
            stale_after: self.stale_after,
            downloading: Mutex::new(HashSet::new()),
            dispatch: Mutex::new(()),
            subscriber,
        });

        let for_events = translator.clone();
        let (watcher, extra) = build(Box::new(move |kind: ChangeKind, path: &Path| {
            for_events.handle_event(kind, path)
        }))?;
        let mut watcher = match self.stale_after {
            Some(stale_after) => {
                let for_ticks = translator.clone();
                watcher.on_tick(stale_after.min(STALE_RESCAN_INTERVAL), move || {
                    for_ticks.reconcile()
                })
            }
            None => watcher,
        };
        watcher.watch_with(&dir, Interest::only([ChangeKind::Write, ChangeKind::Delete]))?;

        // Seed after the watch is live so no transition falls in between.
        translator.reconcile();
        tracing::info!(dir = %dir.display(), "subscribed to download signals");

        Ok((
            SignalSubscription {
                _watcher: watcher,
                translator,
            },
            extra,
        ))
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

pub type SignalCallback = Box<dyn Fn(&PackageIdentifier) + Send + Sync>;

/// Two callback slots for the consumer.
pub struct SignalSubscriber {
    on_begin: SignalCallback,
    on_finish: SignalCallback,
}

/// Lifecycle notification, for consumers that prefer a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalEvent {
    BeganDownloading(PackageIdentifier),
    FinishedInstalling(PackageIdentifier),
}

impl SignalSubscriber {
    pub fn new(
        on_begin: impl Fn(&PackageIdentifier) + Send + Sync + 'static,
        on_finish: impl Fn(&PackageIdentifier) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_begin: Box::new(on_begin),
            on_finish: Box::new(on_finish),
        }
    }

    /// Forward notifications onto a tokio channel, e.g. to reach a UI task.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SignalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let finish_tx = tx.clone();
        let subscriber = Self::new(
            move |id| {
                let _ = tx.send(SignalEvent::BeganDownloading(id.clone()));
            },
            move |id| {
                let _ = finish_tx.send(SignalEvent::FinishedInstalling(id.clone()));
            },
        );
        (subscriber, rx)
    }
}

/// Live consumer registration. Dropping it stops the watcher.
pub struct SignalSubscription<S: EventSource = NotifySource> {
    _watcher: EventWatcher<S>,
    translator: Arc<SignalTranslator>,
}

impl<S: EventSource> SignalSubscription<S> {
    /// Snapshot of the ids currently believed in flight.
    pub fn downloading(&self) -> BTreeSet<PackageIdentifier> {
        lock(&self.translator.downloading).iter().cloned().collect()
    }

    pub fn is_downloading(&self, id: &PackageIdentifier) -> bool {
        lock(&self.translator.downloading).contains(id)
    }

    /// Canonical directory being observed.
    pub fn dir(&self) -> &Path {
        &self.translator.dir
    }
}

// ---------------------------------------------------------------------------
// Event translation
// ---------------------------------------------------------------------------

enum Transition {
    Begin,
    Finish,
}

struct SignalTranslator {
    dir: PathBuf,
    stale_after: Option<Duration>,
    downloading: Mutex<HashSet<PackageIdentifier>>,
    /// Held from the transition decision through its callback.
    dispatch: Mutex<()>,
    subscriber: SignalSubscriber,
}

impl SignalTranslator {
    fn handle_event(&self, kind: ChangeKind, path: &Path) {
        if !matches!(kind, ChangeKind::Write | ChangeKind::Delete) {
            return;
        }
        if path == self.dir {
            self.reconcile();
            return;
        }
        if path.parent() != Some(self.dir.as_path()) {
            return;
        }
        let Some(id) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_signal_file_name)
        else {
            return;
        };
        self.apply(id);
    }

    /// Re-check every id on disk or in the set.
    fn reconcile(&self) {
        let on_disk = match list_signals(&self.dir, self.stale_after) {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), error = %err, "cannot list signal directory");
                return;
            }
        };
        let mut ids: BTreeSet<PackageIdentifier> = lock(&self.downloading).iter().cloned().collect();
        ids.extend(on_disk);
        for id in ids {
            self.apply(id);
        }
    }

    /// Existence is checked under the dispatch lock so concurrent callers
    /// serialize and the last one observes the final on-disk state. The lock
    /// stays held through the callback; `downloading` is only held for the
    /// update so snapshots never wait on a callback.
    fn apply(&self, id: PackageIdentifier) {
        let _dispatch = lock(&self.dispatch);
        let transition = {
            let mut downloading = lock(&self.downloading);
            let present = is_live(&self.dir.join(signal_file_name(&id)), self.stale_after);
            if present && !downloading.contains(&id) {
                downloading.insert(id.clone());
                Some(Transition::Begin)
            } else if !present && downloading.remove(&id) {
                Some(Transition::Finish)
            } else {
                None
            }
        };

        match transition {
            Some(Transition::Begin) => {
                tracing::info!(package = %id, "download began");
                (self.subscriber.on_begin)(&id);
            }
            Some(Transition::Finish) => {
                tracing::info!(package = %id, "download finished");
                (self.subscriber.on_finish)(&id);
            }
            None => {}
        }
    }
}

fn list_signals(
    dir: &Path,
    stale_after: Option<Duration>,
) -> Result<BTreeSet<PackageIdentifier>, SignalError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(io_err(dir, err)),
    };
    let mut ids = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let Some(id) = entry.file_name().to_str().and_then(parse_signal_file_name) else {
            continue;
        };
        if is_live(&entry.path(), stale_after) {
            ids.insert(id);
        }
    }
    Ok(ids)
}

fn is_live(path: &Path, stale_after: Option<Duration>) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    let Some(stale_after) = stale_after else {
        return true;
    };
    match metadata.modified() {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age <= stale_after)
            .unwrap_or(true),
        Err(_) => true,
    }
}
