//! Platform event primitives behind a small trait.
//!
//! An [`EventSource`] only registers and releases OS-level watches; the events
//! themselves are pushed into an [`EventSender`] handed over at construction
//! and drained by the [`EventWatcher`](crate::EventWatcher) dispatch thread.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use notify::{recommended_watcher, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::WatchError;
use crate::event::{ChangeKind, RawEvent};
use crate::watcher::lock;

/// Producer end of the raw event queue.
#[derive(Debug, Clone)]
pub struct EventSender(Sender<RawEvent>);

impl EventSender {
    pub(crate) fn pair() -> (Self, Receiver<RawEvent>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (Self(tx), rx)
    }

    /// Queue one event. Returns `false` once the watcher has been torn down.
    pub fn send(&self, kind: ChangeKind, path: impl Into<PathBuf>) -> bool {
        self.0
            .send(RawEvent {
                kind,
                path: path.into(),
            })
            .is_ok()
    }
}

/// Registers OS-level watches. Implementations must not block.
pub trait EventSource: Send + 'static {
    fn add(&mut self, path: &Path) -> Result<(), WatchError>;
    fn remove(&mut self, path: &Path) -> Result<(), WatchError>;
}

// ---------------------------------------------------------------------------
// notify
// ---------------------------------------------------------------------------

/// notify's recommended backend (kqueue/FSEvents, inotify, ReadDirectoryChangesW).
pub struct NotifySource {
    watcher: RecommendedWatcher,
}

impl NotifySource {
    pub fn new(events: EventSender) -> Result<Self, WatchError> {
        let watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let kind = ChangeKind::from(&event.kind);
                for path in event.paths {
                    if !events.send(kind, path) {
                        return;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "watcher event error");
            }
        })
        .map_err(WatchError::Init)?;
        Ok(Self { watcher })
    }
}

impl EventSource for NotifySource {
    fn add(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Notify {
                path: path.to_path_buf(),
                source,
            })
    }

    fn remove(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .unwatch(path)
            .map_err(|source| WatchError::Notify {
                path: path.to_path_buf(),
                source,
            })
    }
}

// ---------------------------------------------------------------------------
// manual
// ---------------------------------------------------------------------------

/// Source whose events are fired by hand through a [`ManualTrigger`].
///
/// Like a directory watch, a fired path is accepted when it or its parent is
/// currently added.
pub struct ManualSource {
    watched: Arc<Mutex<BTreeSet<PathBuf>>>,
}

/// Test-side handle of a [`ManualSource`].
#[derive(Clone)]
pub struct ManualTrigger {
    events: EventSender,
    watched: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl ManualSource {
    pub fn new(events: EventSender) -> (Self, ManualTrigger) {
        let watched = Arc::new(Mutex::new(BTreeSet::new()));
        (
            Self {
                watched: watched.clone(),
            },
            ManualTrigger { events, watched },
        )
    }
}

impl EventSource for ManualSource {
    fn add(&mut self, path: &Path) -> Result<(), WatchError> {
        lock(&self.watched).insert(path.to_path_buf());
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<(), WatchError> {
        lock(&self.watched).remove(path);
        Ok(())
    }
}

impl ManualTrigger {
    /// Fire a synthetic event. Returns `false` if nothing watches `path`.
    pub fn fire(&self, kind: ChangeKind, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if !self.is_watched(path) {
            return false;
        }
        self.events.send(kind, path)
    }

    fn is_watched(&self, path: &Path) -> bool {
        let watched = lock(&self.watched);
        watched.contains(path) || path.parent().is_some_and(|parent| watched.contains(parent))
    }

    /// Paths currently registered with the source.
    pub fn watched(&self) -> BTreeSet<PathBuf> {
        lock(&self.watched).clone()
    }
}
