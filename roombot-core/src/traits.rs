// ABOUTME: Collaborator interfaces the core requires: transport, storage, ACL, bans, plugins.
// ABOUTME: Also defines the chat message/event data types flowing through dispatch.

use crate::commands::Command;
use crate::error::ConnectError;
use crate::room::{RoomIdentity, UserId};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// Chat Data Types
// =============================================================================

/// Identity of a chat user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: UserId,
    pub name: String,
}

impl ChatUser {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A chat message delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Transport message id
    pub id: u64,
    /// Room the message was posted in
    pub room: RoomIdentity,
    /// Author of the message
    pub user: ChatUser,
    /// Rendered message content
    pub content: String,
}

impl ChatMessage {
    pub fn new(id: u64, room: RoomIdentity, user: ChatUser, content: impl Into<String>) -> Self {
        Self {
            id,
            room,
            user,
            content: content.into(),
        }
    }
}

/// Well-known websocket event type codes
pub mod event_types {
    pub const MESSAGE_POSTED: u32 = 1;
    pub const MESSAGE_EDITED: u32 = 2;
    pub const USER_ENTERED: u32 = 3;
    pub const USER_LEFT: u32 = 4;
    pub const ROOM_NAME_CHANGED: u32 = 5;
    pub const MESSAGE_STARRED: u32 = 6;
    pub const USER_MENTIONED: u32 = 8;
    pub const MESSAGE_DELETED: u32 = 10;
    pub const ACCESS_LEVEL_CHANGED: u32 = 15;
    pub const INVITATION: u32 = 17;
    pub const MESSAGE_REPLY: u32 = 18;
}

/// A raw websocket event delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketEvent {
    /// Global event id; identical across every connection that receives it
    pub id: u64,
    /// Event type code, see [`event_types`]
    pub event_type: u32,
    /// Chat host the event arrived from
    pub host: String,
    /// Room this event is scoped to; `None` for global events
    pub room: Option<RoomIdentity>,
    /// Room the event talks about (e.g. the room an invitation targets)
    #[serde(default)]
    pub subject_room_id: Option<u64>,
    /// User who caused the event
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// User the event is aimed at
    #[serde(default)]
    pub target_user_id: Option<UserId>,
    /// Free-form event content
    #[serde(default)]
    pub content: Option<String>,
}

impl WebSocketEvent {
    /// An event scoped to a single connected room
    pub fn room_event(id: u64, event_type: u32, room: RoomIdentity) -> Self {
        Self {
            id,
            event_type,
            host: room.host.clone(),
            room: Some(room),
            subject_room_id: None,
            user_id: None,
            target_user_id: None,
            content: None,
        }
    }

    /// An event delivered identically to every connection on a host
    pub fn global_event(id: u64, event_type: u32, host: impl Into<String>) -> Self {
        Self {
            id,
            event_type,
            host: host.into(),
            room: None,
            subject_room_id: None,
            user_id: None,
            target_user_id: None,
            content: None,
        }
    }

    pub fn is_global(&self) -> bool {
        self.room.is_none()
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_target_user(mut self, user_id: UserId) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    pub fn with_subject_room(mut self, room_id: u64) -> Self {
        self.subject_room_id = Some(room_id);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Flags controlling how a message is posted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostFlags {
    /// Post even if the room has not approved the bot yet
    pub force: bool,
}

impl PostFlags {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// A message the transport posted on our behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub id: u64,
    pub room: RoomIdentity,
    pub text: String,
}

// =============================================================================
// Transport
// =============================================================================

/// Event sink the transport feeds for one room connection
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn on_connect(&self, room: &RoomIdentity);

    async fn on_disconnect(&self, room: &RoomIdentity);

    async fn on_message_event(&self, message: ChatMessage);

    async fn on_websocket_event(&self, event: WebSocketEvent);
}

/// Chat transport (websocket + HTTP client for one or more chat hosts)
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open the room connection and start feeding `sink`
    async fn connect(
        &self,
        room: &RoomIdentity,
        sink: Arc<dyn ConnectionSink>,
    ) -> std::result::Result<(), ConnectError>;

    /// Leave the room and drop its connection
    async fn leave_room(&self, room: &RoomIdentity) -> Result<()>;

    /// Post a message into the room
    async fn post_message(
        &self,
        room: &RoomIdentity,
        text: &str,
        flags: PostFlags,
    ) -> Result<PostedMessage>;

    /// Look up users present in (or known to) a room
    async fn get_chat_users(&self, room: &RoomIdentity, ids: &[UserId]) -> Result<Vec<ChatUser>>;

    /// Name to use when @-mentioning a user
    async fn get_pingable_name(&self, room: &RoomIdentity, user_id: UserId) -> Result<String>;

    /// True if `user_id` is the bot's own session on `host`
    fn is_self(&self, host: &str, user_id: UserId) -> bool;
}

// =============================================================================
// Storage and Access Control
// =============================================================================

/// Persistent state of transient rooms: membership, invite time, approval and votes
#[async_trait]
pub trait RoomStorage: Send + Sync {
    async fn is_approved(&self, room: &RoomIdentity) -> Result<bool>;

    async fn set_approved(&self, room: &RoomIdentity, approved: bool) -> Result<()>;

    /// Start tracking a room, recording when the bot was invited
    async fn add_room(&self, room: &RoomIdentity, invited_at: DateTime<Utc>) -> Result<()>;

    /// Forget a room along with its votes and approval state
    async fn remove_room(&self, room: &RoomIdentity) -> Result<()>;

    async fn contains_room(&self, room: &RoomIdentity) -> Result<bool>;

    async fn get_all_rooms(&self) -> Result<Vec<RoomIdentity>>;

    async fn get_invite_timestamp(&self, room: &RoomIdentity) -> Result<Option<DateTime<Utc>>>;

    async fn add_approve_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<()>;

    async fn get_approve_votes(&self, room: &RoomIdentity) -> Result<BTreeSet<UserId>>;

    async fn contains_approve_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<bool>;

    async fn add_leave_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<()>;

    async fn get_leave_votes(&self, room: &RoomIdentity) -> Result<BTreeSet<UserId>>;

    async fn contains_leave_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<bool>;
}

/// Room ownership lookups
#[async_trait]
pub trait AclDataAccessor: Send + Sync {
    async fn is_room_owner(&self, room: &RoomIdentity, user_id: UserId) -> Result<bool>;

    async fn get_room_owners(&self, room: &RoomIdentity) -> Result<Vec<UserId>>;
}

/// Global ban list
#[async_trait]
pub trait BanStorage: Send + Sync {
    async fn is_banned(&self, user_id: UserId) -> Result<bool>;
}

/// Room-scoped command aliases
#[async_trait]
pub trait AliasStore: Send + Sync {
    /// Replacement command text for `name` in `room`, if one is defined
    async fn get_alias(&self, room: &RoomIdentity, name: &str) -> Result<Option<String>>;
}

// =============================================================================
// Handlers
// =============================================================================

/// A command compiled into the bot
#[async_trait]
pub trait BuiltInCommand: Send + Sync {
    /// Every name this command answers to
    fn command_names(&self) -> Vec<String>;

    async fn handle_command(&self, command: &Command) -> Result<()>;
}

/// A built-in handler for websocket events
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_types(&self) -> Vec<u32>;

    async fn handle_event(&self, event: &WebSocketEvent) -> Result<()>;
}

/// Capability interface implemented by every plugin.
///
/// A plugin declares what it wants to see (command names, event types, every
/// plain message) and receives those through the matching `handle_*` method.
/// Plugins are enabled when a room connects and disabled when it drops.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Command names routed to this plugin
    fn command_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Room event types routed to this plugin
    fn event_types(&self) -> Vec<u32> {
        Vec::new()
    }

    /// Whether every non-command message is routed to this plugin
    fn wants_all_messages(&self) -> bool {
        false
    }

    async fn handle_command(&self, _command: &Command) -> Result<()> {
        Ok(())
    }

    async fn handle_event(&self, _event: &WebSocketEvent) -> Result<()> {
        Ok(())
    }

    async fn handle_message(&self, _message: &ChatMessage) -> Result<()> {
        Ok(())
    }

    async fn enable_for_room(&self, _room: &RoomIdentity, _persist: bool) -> Result<()> {
        Ok(())
    }

    async fn disable_for_room(&self, _room: &RoomIdentity, _persist: bool) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_scope() {
        let room = RoomIdentity::new("chat.example.com", 7);
        let scoped = WebSocketEvent::room_event(1, event_types::USER_ENTERED, room.clone());
        assert!(!scoped.is_global());
        assert_eq!(scoped.host, "chat.example.com");

        let global = WebSocketEvent::global_event(2, event_types::INVITATION, "chat.example.com")
            .with_user(5)
            .with_target_user(9)
            .with_subject_room(42);
        assert!(global.is_global());
        assert_eq!(global.subject_room_id, Some(42));
        assert_eq!(global.target_user_id, Some(9));
    }

    #[test]
    fn test_post_flags_default_is_not_forced() {
        assert!(!PostFlags::default().force);
        assert!(PostFlags::forced().force);
    }
}
