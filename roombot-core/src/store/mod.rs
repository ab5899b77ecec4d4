// ABOUTME: Storage backends for room state, bans and aliases.
// ABOUTME: MemoryStore for tests and ephemeral runs, SqliteStore for persistence across restarts.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Vote kind column value in `room_votes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum VoteKind {
    Approve,
    Leave,
}

impl VoteKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Leave => "leave",
        }
    }
}
