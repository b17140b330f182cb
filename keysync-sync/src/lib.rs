//! # keysync-sync
//!
//! Package synchronization for the host process.
//!
//! [`SyncOrchestrator::synchronize`] runs one pass: resolve repositories,
//! check package status, download what is stale (raising a signal file for
//! each download), then install everything in a single transaction.
//! [`PrefixStore`] is the bundled [`PackageStore`] over a local prefix.

pub mod error;
pub mod orchestrator;
pub mod prefix;
pub mod session;
pub mod store;

pub use error::{StoreError, SyncError};
pub use orchestrator::{SyncOrchestrator, SyncReport};
pub use prefix::PrefixStore;
pub use session::{SyncPhase, SyncSession};
pub use store::{DownloadProgress, PackageStore, Transaction, TransactionEvent};
