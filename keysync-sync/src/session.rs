//! Per-call synchronization session.
//!
//! Phases only move forward:
//!
//! ```text
//! Resolving → Checking → Downloading → Installing → Completed
//!      └──────────┴────────────┴────────────┴──────→ Failed
//! ```
//!
//! `Checking` may jump straight to `Completed` when nothing needs action.

use std::collections::HashSet;
use std::fmt;

use keysync_core::PackageIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncPhase {
    Resolving,
    Checking,
    Downloading,
    Installing,
    Completed,
    Failed,
}

impl SyncPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncPhase::Completed | SyncPhase::Failed)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Resolving => write!(f, "resolving"),
            SyncPhase::Checking => write!(f, "checking"),
            SyncPhase::Downloading => write!(f, "downloading"),
            SyncPhase::Installing => write!(f, "installing"),
            SyncPhase::Completed => write!(f, "completed"),
            SyncPhase::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug)]
pub struct SyncSession {
    candidates: Vec<PackageIdentifier>,
    requires_action: Vec<PackageIdentifier>,
    phase: SyncPhase,
}

impl SyncSession {
    /// Start in `Resolving` with `enabled` deduplicated, first occurrence kept.
    pub fn new(enabled: &[PackageIdentifier]) -> Self {
        let mut seen = HashSet::new();
        let candidates = enabled
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        Self {
            candidates,
            requires_action: Vec::new(),
            phase: SyncPhase::Resolving,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn candidates(&self) -> &[PackageIdentifier] {
        &self.candidates
    }

    pub fn requires_action(&self) -> &[PackageIdentifier] {
        &self.requires_action
    }

    pub(crate) fn mark_requires_action(&mut self, package: PackageIdentifier) {
        self.requires_action.push(package);
    }

    /// Move to `next`. Backward moves and moves out of a terminal phase are
    /// refused and return `false`.
    pub fn advance(&mut self, next: SyncPhase) -> bool {
        if self.phase.is_terminal() || next <= self.phase {
            tracing::warn!(from = %self.phase, to = %next, "refusing sync phase transition");
            return false;
        }
        tracing::debug!(from = %self.phase, to = %next, "sync phase");
        self.phase = next;
        true
    }
}
