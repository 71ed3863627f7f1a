use derive_more::Display;

/// A vault branch.
///
/// `Keep`, `Archive` and `Stash` are user-facing annotations; `Staged` and
/// `Limbo` are owned by the sweep/drain machinery and cannot be targeted
/// directly by users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Branch {
    /// Retain the source file; never subject to automatic deletion.
    #[display("keep")]
    Keep,

    /// Source is pending archival; staging deletes the source.
    #[display("archive")]
    Archive,

    /// Archive variant: staging leaves the source in place.
    #[display("stash")]
    Stash,

    /// Awaiting drain into the downstream handler.
    #[display("staged")]
    Staged,

    /// Soft-deleted; recoverable until the limbo grace elapses.
    #[display("limbo")]
    Limbo,
}

impl Branch {
    /// Every branch, in on-disk creation order.
    pub const ALL: [Branch; 5] = [
        Branch::Keep,
        Branch::Archive,
        Branch::Stash,
        Branch::Staged,
        Branch::Limbo,
    ];

    /// The branch's directory name inside `.vault`.
    ///
    /// Machinery-owned branches carry a leading dot so they are hidden
    /// from casual listing.
    pub fn dirname(self) -> &'static str {
        match self {
            Branch::Keep => "keep",
            Branch::Archive => "archive",
            Branch::Stash => ".stash",
            Branch::Staged => ".staged",
            Branch::Limbo => ".limbo",
        }
    }

    /// Inverse of [`Branch::dirname`].
    pub fn from_dirname(name: &str) -> Option<Branch> {
        Branch::ALL.into_iter().find(|b| b.dirname() == name)
    }

    /// Whether users may annotate files into this branch.
    pub fn is_user_facing(self) -> bool {
        matches!(self, Branch::Keep | Branch::Archive | Branch::Stash)
    }
}
