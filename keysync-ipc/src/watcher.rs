//! Event-based path watcher.
//!
//! One [`EventWatcher`] owns one [`EventSource`] and at most one dispatch
//! thread. The thread is spawned by the first successful `watch`, blocks on
//! the raw event queue with a bounded timeout, and is joined on drop. An
//! optional tick runs on the same thread, so it never overlaps a callback.
//!
//! Paths are canonicalized before registration so that events reported with
//! real paths (FSEvents reports `/private/var/...` on macOS) match the table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::WatchError;
use crate::event::{ChangeKind, Interest, RawEvent};
use crate::source::{EventSender, EventSource, ManualSource, ManualTrigger, NotifySource};

/// Upper bound on how long the dispatch thread blocks before re-checking shutdown.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_millis(250);

/// Shortest allowed tick period.
pub const MIN_TICK: Duration = Duration::from_millis(10);

pub type EventCallback = Arc<dyn Fn(ChangeKind, &Path) + Send + Sync>;

/// Periodic work on the dispatch thread, run between events.
#[derive(Clone)]
struct Tick {
    every: Duration,
    run: Arc<dyn Fn() + Send + Sync>,
}

/// Identifies one active observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(u64);

struct WatchedPath {
    handle: WatchHandle,
    interest: Interest,
}

/// path → handle. Mirrors exactly what is registered with the source.
#[derive(Default)]
struct WatchTable {
    next_handle: u64,
    paths: HashMap<PathBuf, WatchedPath>,
}

impl WatchTable {
    fn insert(&mut self, path: PathBuf, interest: Interest) -> WatchHandle {
        self.next_handle += 1;
        let handle = WatchHandle(self.next_handle);
        self.paths.insert(path, WatchedPath { handle, interest });
        handle
    }

    fn remove(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        let path = self
            .paths
            .iter()
            .find(|(_, watched)| watched.handle == handle)
            .map(|(path, _)| path.clone())?;
        self.paths.remove(&path);
        Some(path)
    }

    /// An event qualifies when its path, or the directory containing it, is
    /// watched with a matching interest.
    fn accepts(&self, event: &RawEvent) -> bool {
        if let Some(watched) = self.paths.get(&event.path) {
            return watched.interest.accepts(event.kind);
        }
        event
            .path
            .parent()
            .and_then(|parent| self.paths.get(parent))
            .is_some_and(|watched| watched.interest.accepts(event.kind))
    }
}

pub struct EventWatcher<S: EventSource = NotifySource> {
    source: S,
    table: Arc<Mutex<WatchTable>>,
    callback: EventCallback,
    tick: Option<Tick>,
    pending: Option<Receiver<RawEvent>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EventWatcher<NotifySource> {
    /// Watcher on the platform's native notification facility.
    ///
    /// Fails once if the facility cannot be created; not retried.
    pub fn new(
        callback: impl Fn(ChangeKind, &Path) + Send + Sync + 'static,
    ) -> Result<Self, WatchError> {
        Self::with_source(NotifySource::new, callback)
    }
}

impl EventWatcher<ManualSource> {
    /// Watcher driven by synthetic events.
    pub fn manual(callback: impl Fn(ChangeKind, &Path) + Send + Sync + 'static) -> (Self, ManualTrigger) {
        let (events, receiver) = EventSender::pair();
        let (source, trigger) = ManualSource::new(events);
        (Self::from_parts(source, receiver, Arc::new(callback)), trigger)
    }
}

impl<S: EventSource> EventWatcher<S> {
    pub fn with_source(
        build: impl FnOnce(EventSender) -> Result<S, WatchError>,
        callback: impl Fn(ChangeKind, &Path) + Send + Sync + 'static,
    ) -> Result<Self, WatchError> {
        let (events, receiver) = EventSender::pair();
        let source = build(events)?;
        Ok(Self::from_parts(source, receiver, Arc::new(callback)))
    }

    fn from_parts(source: S, receiver: Receiver<RawEvent>, callback: EventCallback) -> Self {
        Self {
            source,
            table: Arc::new(Mutex::new(WatchTable::default())),
            callback,
            tick: None,
            pending: Some(receiver),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Also call `tick` on the dispatch thread about every `every`, whether
    /// or not events arrive. Takes effect when the dispatch thread starts.
    pub fn on_tick(mut self, every: Duration, tick: impl Fn() + Send + Sync + 'static) -> Self {
        self.tick = Some(Tick {
            every: every.max(MIN_TICK),
            run: Arc::new(tick),
        });
        self
    }

    /// Watch `path` for every change kind.
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<WatchHandle, WatchError> {
        self.watch_with(path, Interest::All)
    }

    /// Watch `path` for the kinds in `interest`.
    ///
    /// Watching an already watched path returns its existing handle and keeps
    /// the original interest.
    pub fn watch_with(
        &mut self,
        path: impl AsRef<Path>,
        interest: Interest,
    ) -> Result<WatchHandle, WatchError> {
        let path = path.as_ref();
        let path = std::fs::canonicalize(path).map_err(|source| WatchError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(existing) = lock(&self.table).paths.get(&path) {
            return Ok(existing.handle);
        }

        self.source.add(&path)?;
        let handle = lock(&self.table).insert(path.clone(), interest);

        if let Err(err) = self.ensure_running() {
            lock(&self.table).remove(handle);
            let _ = self.source.remove(&path);
            return Err(err);
        }

        tracing::debug!(path = %path.display(), "watching path");
        Ok(handle)
    }

    /// Stop observing the path behind `handle`. Unknown handles are ignored.
    pub fn unwatch(&mut self, handle: WatchHandle) {
        let Some(path) = lock(&self.table).remove(handle) else {
            return;
        };
        if let Err(err) = self.source.remove(&path) {
            tracing::warn!(path = %path.display(), error = %err, "failed to release watch");
        }
        tracing::debug!(path = %path.display(), "stopped watching path");
    }

    pub fn is_watched(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        lock(&self.table).paths.contains_key(&canonical)
    }

    /// Snapshot of watched paths, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = lock(&self.table).paths.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn ensure_running(&mut self) -> Result<(), WatchError> {
        let Some(receiver) = self.pending.take() else {
            return Ok(());
        };
        self.running.store(true, Ordering::Release);

        let table = self.table.clone();
        let callback = self.callback.clone();
        let tick = self.tick.clone();
        let running = self.running.clone();
        let worker = thread::Builder::new()
            .name("keysync-watch".to_string())
            .spawn(move || dispatch_loop(receiver, table, callback, tick, running))
            .map_err(WatchError::Spawn)?;
        self.worker = Some(worker);
        Ok(())
    }
}

impl<S: EventSource> Drop for EventWatcher<S> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);

        let paths: Vec<PathBuf> = lock(&self.table).paths.drain().map(|(path, _)| path).collect();
        for path in paths {
            if let Err(err) = self.source.remove(&path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to release watch");
            }
        }

        if let Some(worker) = self.worker.take() {
            // Dropped from inside a callback: the thread exits on its own.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

fn dispatch_loop(
    receiver: Receiver<RawEvent>,
    table: Arc<Mutex<WatchTable>>,
    callback: EventCallback,
    tick: Option<Tick>,
    running: Arc<AtomicBool>,
) {
    let timeout = tick
        .as_ref()
        .map_or(DISPATCH_TIMEOUT, |tick| tick.every.min(DISPATCH_TIMEOUT));
    let mut last_tick = Instant::now();
    while running.load(Ordering::Acquire) {
        match receiver.recv_timeout(timeout) {
            // Checked at delivery time so nothing queued before an unwatch leaks out.
            Ok(event) => {
                if running.load(Ordering::Acquire) && lock(&table).accepts(&event) {
                    callback(event.kind, &event.path);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Some(tick) = &tick {
            if running.load(Ordering::Acquire) && last_tick.elapsed() >= tick.every {
                last_tick = Instant::now();
                (tick.run)();
            }
        }
    }
    tracing::debug!("watch dispatch thread exiting");
}

/// Lock ignoring poisoning; a panicking callback must not wedge the watcher.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(2);

    fn recording_watcher() -> (
        EventWatcher<ManualSource>,
        ManualTrigger,
        mpsc::Receiver<(ChangeKind, PathBuf)>,
    ) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let (watcher, trigger) = EventWatcher::manual(move |kind, path| {
            let _ = lock(&tx).send((kind, path.to_path_buf()));
        });
        (watcher, trigger, rx)
    }

    #[test]
    fn dispatch_thread_starts_lazily() {
        let dir = TempDir::new().expect("dir");
        let (mut watcher, _trigger, _rx) = recording_watcher();
        assert!(watcher.worker.is_none(), "no thread before the first watch");

        watcher.watch(dir.path()).expect("watch");
        assert!(watcher.worker.is_some());
    }

    #[test]
    fn watching_twice_returns_same_handle() {
        let dir = TempDir::new().expect("dir");
        let (mut watcher, trigger, _rx) = recording_watcher();

        let first = watcher.watch(dir.path()).expect("watch");
        let second = watcher.watch(dir.path()).expect("watch again");
        assert_eq!(first, second);
        assert_eq!(trigger.watched().len(), 1, "one OS-level watch");
        assert_eq!(watcher.watched_paths().len(), 1);
    }

    #[test]
    fn events_for_children_of_watched_directory_are_delivered() {
        let dir = TempDir::new().expect("dir");
        let (mut watcher, trigger, rx) = recording_watcher();
        watcher.watch(dir.path()).expect("watch");

        let canonical = std::fs::canonicalize(dir.path()).expect("canonical");
        let child = canonical.join("download-x");
        assert!(trigger.fire(ChangeKind::Write, &child));

        let (kind, path) = rx.recv_timeout(WAIT).expect("event delivered");
        assert_eq!(kind, ChangeKind::Write);
        assert_eq!(path, child);
    }

    #[test]
    fn events_for_one_path_keep_source_order() {
        let dir = TempDir::new().expect("dir");
        let (mut watcher, trigger, rx) = recording_watcher();
        watcher.watch(dir.path()).expect("watch");
        let child = std::fs::canonicalize(dir.path()).expect("canonical").join("f");

        let kinds = [
            ChangeKind::Write,
            ChangeKind::AttributeChange,
            ChangeKind::Delete,
            ChangeKind::Write,
        ];
        for kind in kinds {
            trigger.fire(kind, &child);
        }
        let received: Vec<ChangeKind> = (0..kinds.len())
            .map(|_| rx.recv_timeout(WAIT).expect("event").0)
            .collect();
        assert_eq!(received, kinds);
    }

    #[test]
    fn unwatch_stops_delivery_and_rewatch_restores_it() {
        let dir = TempDir::new().expect("dir");
        let (mut watcher, trigger, rx) = recording_watcher();
        let canonical = std::fs::canonicalize(dir.path()).expect("canonical");

        let handle = watcher.watch(dir.path()).expect("watch");
        watcher.unwatch(handle);
        watcher.unwatch(handle);
        assert!(!watcher.is_watched(dir.path()));
        assert!(trigger.watched().is_empty(), "source released the path");

        assert!(!trigger.fire(ChangeKind::Write, canonical.join("a")));
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        let again = watcher.watch(dir.path()).expect("rewatch");
        assert_ne!(again, handle);
        assert!(trigger.fire(ChangeKind::Delete, canonical.join("b")));
        let (kind, path) = rx.recv_timeout(WAIT).expect("event after rewatch");
        assert_eq!(kind, ChangeKind::Delete);
        assert_eq!(path, canonical.join("b"));
    }

    #[test]
    fn interest_filters_delivery() {
        let dir = TempDir::new().expect("dir");
        let (mut watcher, trigger, rx) = recording_watcher();
        watcher
            .watch_with(dir.path(), Interest::only([ChangeKind::Delete]))
            .expect("watch");
        let child = std::fs::canonicalize(dir.path()).expect("canonical").join("f");

        trigger.fire(ChangeKind::Write, &child);
        trigger.fire(ChangeKind::Delete, &child);
        let (kind, _) = rx.recv_timeout(WAIT).expect("delete delivered");
        assert_eq!(kind, ChangeKind::Delete);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn watching_missing_path_fails() {
        let dir = TempDir::new().expect("dir");
        let (mut watcher, trigger, _rx) = recording_watcher();
        let err = watcher.watch(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, WatchError::Open { .. }), "got: {err}");
        assert!(trigger.watched().is_empty());
        assert!(watcher.worker.is_none());
    }

    #[test]
    fn tick_runs_while_idle_and_stops_on_drop() {
        let dir = TempDir::new().expect("dir");
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let (watcher, _trigger) = EventWatcher::manual(|_, _| {});
        let mut watcher = watcher.on_tick(Duration::from_millis(20), move || {
            let _ = lock(&tx).send(());
        });
        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "no tick before the thread starts"
        );

        watcher.watch(dir.path()).expect("watch");
        for _ in 0..3 {
            rx.recv_timeout(WAIT).expect("tick without events");
        }

        drop(watcher);
        while rx.try_recv().is_ok() {}
        assert!(matches!(
            rx.recv_timeout(WAIT),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn drop_releases_watches_and_joins_thread() {
        let dir = TempDir::new().expect("dir");
        let (mut watcher, trigger, rx) = recording_watcher();
        watcher.watch(dir.path()).expect("watch");
        let canonical = std::fs::canonicalize(dir.path()).expect("canonical");

        drop(watcher);
        assert!(trigger.watched().is_empty());
        assert!(!trigger.fire(ChangeKind::Write, canonical.join("f")));
        assert!(matches!(
            rx.recv_timeout(WAIT),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }
}
