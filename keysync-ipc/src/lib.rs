//! Filesystem signaling between the host app and the keyboard extension.
//!
//! - [`watcher`]: [`EventWatcher`]: one dispatch thread over an [`EventSource`]
//! - [`source`]: notify-backed and manual event sources
//! - [`polling`]: [`PollingWatcher`]: snapshot/diff a directory on an interval
//! - [`signal`]: [`SignalChannel`]: `download-<id>` sentinel files

mod error;
pub mod event;
pub mod polling;
pub mod signal;
pub mod source;
pub mod watcher;

pub use error::{SignalError, WatchError};
pub use event::{ChangeKind, Interest, RawEvent};
pub use polling::{FolderChange, PollingHandle, PollingWatcher};
pub use signal::{
    parse_signal_file_name, signal_file_name, SignalChannel, SignalEvent, SignalSubscriber,
    SignalSubscription,
};
pub use source::{EventSender, EventSource, ManualSource, ManualTrigger, NotifySource};
pub use watcher::{EventWatcher, WatchHandle};
