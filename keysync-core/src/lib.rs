//! keysync core library: package domain types and configuration.
//!
//! Public API surface:
//! - [`types`]: package identifiers, statuses and transaction actions
//! - [`config`]: load / save `~/.keysync/config.yaml`
//! - [`paths`]: on-disk layout shared by the host and extension processes
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{PackageIdentifier, PackageStatus, RepositoryMap, TransactionAction};
