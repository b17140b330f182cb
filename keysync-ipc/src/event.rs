//! Change kinds delivered by [`EventWatcher`](crate::EventWatcher).

use std::collections::BTreeSet;
use std::path::PathBuf;

use notify::event::{AccessKind, AccessMode, DataChange, ModifyKind};
use notify::EventKind;

/// Low-level change notification, independent of the platform primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    Rename,
    Write,
    Delete,
    AttributeChange,
    SizeIncrease,
    LinkCountChange,
    AccessRevocation,
    Unlock,
    Default,
}

impl From<&EventKind> for ChangeKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            // Creating an entry writes the containing directory.
            EventKind::Create(_) => ChangeKind::Write,
            EventKind::Remove(_) => ChangeKind::Delete,
            EventKind::Modify(ModifyKind::Data(DataChange::Size)) => ChangeKind::SizeIncrease,
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                ChangeKind::Write
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => ChangeKind::AttributeChange,
            EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Rename,
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => ChangeKind::Write,
            _ => ChangeKind::Default,
        }
    }
}

/// Event kinds a watched path wants delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Interest {
    #[default]
    All,
    Only(BTreeSet<ChangeKind>),
}

impl Interest {
    pub fn only(kinds: impl IntoIterator<Item = ChangeKind>) -> Self {
        Interest::Only(kinds.into_iter().collect())
    }

    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match self {
            Interest::All => true,
            Interest::Only(kinds) => kinds.contains(&kind),
        }
    }
}

/// One change for one path, as queued by an event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, MetadataKind, RemoveKind, RenameMode};

    #[test]
    fn notify_kinds_map_to_change_kinds() {
        let cases = [
            (EventKind::Create(CreateKind::File), ChangeKind::Write),
            (EventKind::Remove(RemoveKind::File), ChangeKind::Delete),
            (
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                ChangeKind::Write,
            ),
            (
                EventKind::Modify(ModifyKind::Data(DataChange::Size)),
                ChangeKind::SizeIncrease,
            ),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                ChangeKind::AttributeChange,
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                ChangeKind::Rename,
            ),
            (
                EventKind::Access(AccessKind::Close(AccessMode::Write)),
                ChangeKind::Write,
            ),
            (EventKind::Access(AccessKind::Read), ChangeKind::Default),
            (EventKind::Other, ChangeKind::Default),
        ];
        for (kind, expected) in cases {
            assert_eq!(ChangeKind::from(&kind), expected, "{kind:?}");
        }
    }

    #[test]
    fn interest_filters_kinds() {
        let interest = Interest::only([ChangeKind::Write, ChangeKind::Delete]);
        assert!(interest.accepts(ChangeKind::Write));
        assert!(!interest.accepts(ChangeKind::Rename));
        assert!(Interest::All.accepts(ChangeKind::Unlock));
    }
}
