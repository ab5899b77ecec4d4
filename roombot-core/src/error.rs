// ABOUTME: Typed error results for room presence, voting, connection and queue failures.
// ABOUTME: Domain conditions are distinct variants; plumbing failures wrap anyhow::Error.

use crate::room::RoomIdentity;
use thiserror::Error;

/// Outcome of a rejected approve/leave vote
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("This room has already been approved")]
    AlreadyApproved,

    #[error("Only room owners can vote")]
    UserNotAcceptable,

    #[error("You have already voted")]
    UserAlreadyVoted,

    #[error("Room {0} is not subject to approval voting")]
    RoomNotTracked(RoomIdentity),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoteError {
    /// True for conditions a user can cause by voting, as opposed to internal failures
    pub fn is_domain(&self) -> bool {
        !matches!(self, VoteError::Other(_))
    }
}

/// Failure to admit a room
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("Room {0} is a permanent room")]
    PermanentRoom(RoomIdentity),

    #[error("Room {0} is already tracked")]
    AlreadyTracked(RoomIdentity),

    #[error("Could not connect to room {room}: {source}")]
    Connect {
        room: RoomIdentity,
        #[source]
        source: ConnectError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure reported by the transport while connecting to a room
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Network hiccups, rate limits, websocket resets; worth retrying
    #[error("transient connection failure: {0}")]
    Transient(anyhow::Error),

    /// Room deleted, bot banned, bad credentials; retrying will not help
    #[error("fatal connection failure: {0}")]
    Fatal(anyhow::Error),
}

impl ConnectError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(err.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectError::Transient(_))
    }
}

/// The room worker went away before the queued action produced a result
#[derive(Debug, Error)]
#[error("queued action for room {room} was dropped before completing")]
pub struct QueueError {
    pub room: String,
}

impl From<QueueError> for VoteError {
    fn from(err: QueueError) -> Self {
        VoteError::Other(err.into())
    }
}

impl From<QueueError> for PresenceError {
    fn from(err: QueueError) -> Self {
        PresenceError::Other(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_error_domain_classification() {
        assert!(VoteError::AlreadyApproved.is_domain());
        assert!(VoteError::UserNotAcceptable.is_domain());
        assert!(VoteError::UserAlreadyVoted.is_domain());
        assert!(!VoteError::Other(anyhow::anyhow!("db gone")).is_domain());
    }

    #[test]
    fn test_connect_error_classification() {
        assert!(ConnectError::transient(anyhow::anyhow!("reset")).is_transient());
        assert!(!ConnectError::fatal(anyhow::anyhow!("banned")).is_transient());
    }

    #[test]
    fn test_queue_error_converts_to_other() {
        let err: VoteError = QueueError {
            room: "chat.example.com:1".into(),
        }
        .into();
        assert!(matches!(err, VoteError::Other(_)));
    }
}
