// ABOUTME: Built-in admin commands (approve, leave, join) and the invitation event handler.
// ABOUTME: Each calls into the presence controller and replies with the tally or the refusal reason.

use crate::commands::Command;
use crate::error::{PresenceError, VoteError};
use crate::notices;
use crate::presence::{RoomPresenceController, WeakPresence};
use crate::room::RoomIdentity;
use crate::traits::{event_types, BuiltInCommand, ChatTransport, EventHandler, PostFlags, WebSocketEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

fn controller(presence: &WeakPresence) -> Result<RoomPresenceController> {
    presence
        .upgrade()
        .context("Presence controller is shutting down")
}

async fn reply(transport: &Arc<dyn ChatTransport>, room: &RoomIdentity, text: &str) -> Result<()> {
    transport
        .post_message(room, text, PostFlags::forced())
        .await
        .with_context(|| format!("Failed to reply in {}", room))?;
    Ok(())
}

/// `approve`: an owner's vote to keep the bot in an unapproved room
pub struct ApproveCommand {
    presence: WeakPresence,
    transport: Arc<dyn ChatTransport>,
}

impl ApproveCommand {
    pub fn new(presence: WeakPresence, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            presence,
            transport,
        }
    }
}

#[async_trait]
impl BuiltInCommand for ApproveCommand {
    fn command_names(&self) -> Vec<String> {
        vec!["approve".to_string()]
    }

    async fn handle_command(&self, command: &Command) -> Result<()> {
        let presence = controller(&self.presence)?;
        let room = command.room();
        match presence.add_approve_vote(room, command.user_id()).await {
            // The controller announces approval itself
            Ok(tally) if tally.threshold_reached => Ok(()),
            Ok(tally) => {
                reply(
                    &self.transport,
                    room,
                    &notices::approve_vote_recorded(tally.count, tally.required),
                )
                .await
            }
            Err(VoteError::Other(e)) => Err(e),
            Err(e) => reply(&self.transport, room, &e.to_string()).await,
        }
    }
}

/// `leave`: an owner's vote to make the bot leave
pub struct LeaveCommand {
    presence: WeakPresence,
    transport: Arc<dyn ChatTransport>,
}

impl LeaveCommand {
    pub fn new(presence: WeakPresence, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            presence,
            transport,
        }
    }
}

#[async_trait]
impl BuiltInCommand for LeaveCommand {
    fn command_names(&self) -> Vec<String> {
        vec!["leave".to_string()]
    }

    async fn handle_command(&self, command: &Command) -> Result<()> {
        let presence = controller(&self.presence)?;
        let room = command.room();
        match presence.add_leave_vote(room, command.user_id()).await {
            // Goodbye was posted before leaving
            Ok(tally) if tally.threshold_reached => Ok(()),
            Ok(tally) => {
                reply(
                    &self.transport,
                    room,
                    &notices::leave_vote_recorded(tally.count, tally.required),
                )
                .await
            }
            Err(VoteError::Other(e)) => Err(e),
            Err(e) => reply(&self.transport, room, &e.to_string()).await,
        }
    }
}

/// `join <host> <room_id>`: admit another room on behalf of the caller
pub struct JoinCommand {
    presence: WeakPresence,
    transport: Arc<dyn ChatTransport>,
}

impl JoinCommand {
    pub fn new(presence: WeakPresence, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            presence,
            transport,
        }
    }
}

#[async_trait]
impl BuiltInCommand for JoinCommand {
    fn command_names(&self) -> Vec<String> {
        vec!["join".to_string()]
    }

    async fn handle_command(&self, command: &Command) -> Result<()> {
        let here = command.room();
        let (Some(host), Some(id)) = (command.arg(0), command.arg(1)) else {
            return reply(&self.transport, here, "Usage: join <host> <room_id>").await;
        };
        let Ok(room_id) = id.parse::<u64>() else {
            return reply(&self.transport, here, &format!("'{}' is not a room id", id)).await;
        };

        let target = RoomIdentity::new(host, room_id);
        let presence = controller(&self.presence)?;
        match presence.add_room(&target, command.user_id()).await {
            Ok(admission) => {
                let status = if admission.approved {
                    "approved".to_string()
                } else {
                    format!("{}/{} approvals", admission.votes, admission.required)
                };
                reply(&self.transport, here, &format!("Joined {} ({}).", target, status)).await
            }
            Err(e @ (PresenceError::PermanentRoom(_) | PresenceError::AlreadyTracked(_))) => {
                reply(&self.transport, here, &e.to_string()).await
            }
            Err(e) => Err(anyhow::Error::new(e)),
        }
    }
}

/// Admits the room named in a global invitation event aimed at the bot
pub struct InvitationHandler {
    presence: WeakPresence,
    transport: Arc<dyn ChatTransport>,
}

impl InvitationHandler {
    pub fn new(presence: WeakPresence, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            presence,
            transport,
        }
    }
}

#[async_trait]
impl EventHandler for InvitationHandler {
    fn event_types(&self) -> Vec<u32> {
        vec![event_types::INVITATION]
    }

    async fn handle_event(&self, event: &WebSocketEvent) -> Result<()> {
        if let Some(target) = event.target_user_id {
            if !self.transport.is_self(&event.host, target) {
                return Ok(());
            }
        }
        let room_id = event
            .subject_room_id
            .context("Invitation event has no target room")?;
        let inviter = event.user_id.context("Invitation event has no inviting user")?;
        let room = RoomIdentity::new(event.host.clone(), room_id);

        tracing::info!(room = %room, inviter, event_id = event.id, "Invited to room");
        match controller(&self.presence)?.add_room(&room, inviter).await {
            Ok(admission) => {
                tracing::info!(room = %room, approved = admission.approved, "Invitation accepted");
                Ok(())
            }
            Err(e @ (PresenceError::PermanentRoom(_) | PresenceError::AlreadyTracked(_))) => {
                tracing::info!(room = %room, reason = %e, "Ignoring invitation");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e)),
        }
    }
}
