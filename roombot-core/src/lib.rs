// ABOUTME: Room presence and event dispatch core for a multi-room chat bot.
// ABOUTME: Transport, storage and ACL are traits; this crate owns voting, timers, reconnects and routing.

pub mod acl;
pub mod builtins;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod notices;
pub mod paths;
pub mod presence;
pub mod queue;
pub mod reconnect;
pub mod room;
pub mod router;
pub mod store;
pub mod testing;
pub mod traits;

pub use commands::{Command, CommandResolver};
pub use dedup::EventDedupBuffer;
pub use dispatcher::{EventDispatcher, EventDispatcherFactory};
pub use error::{ConnectError, PresenceError, QueueError, VoteError};
pub use presence::{
    Admission, PresenceSettings, RestoreSummary, RoomPresenceController, TimerKind, VoteTally,
    WeakPresence,
};
pub use room::{RoomIdentity, UserId};
pub use router::{CommandOutcome, CommandRouter};

// Re-export collaborator traits and data types
pub use traits::{
    // Collaborators
    AclDataAccessor, AliasStore, BanStorage, ChatTransport, ConnectionSink, RoomStorage,
    // Handlers
    BuiltInCommand, EventHandler, Plugin,
    // Data Types
    ChatMessage, ChatUser, PostFlags, PostedMessage, WebSocketEvent,
};
