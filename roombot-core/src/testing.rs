// ABOUTME: Scriptable in-memory chat transport for tests and demos.
// ABOUTME: Records posts, connection attempts and leaves; connect outcomes can be queued up front.

use crate::error::ConnectError;
use crate::room::{RoomIdentity, UserId};
use crate::traits::{ChatTransport, ChatUser, ConnectionSink, PostFlags, PostedMessage};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// User id the mock transport treats as its own session
pub const MOCK_SELF_ID: UserId = 1000;

/// Scripted result of one `connect` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    Succeed,
    Transient,
    Fatal,
}

/// A recorded post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPost {
    pub room: RoomIdentity,
    pub text: String,
    pub forced: bool,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<ConnectStep>,
    attempts: Vec<(RoomIdentity, Instant)>,
    sinks: HashMap<RoomIdentity, Arc<dyn ConnectionSink>>,
    posts: Vec<RecordedPost>,
    left: Vec<RoomIdentity>,
    names: HashMap<UserId, String>,
}

/// Transport double: connects succeed unless scripted otherwise
pub struct MockTransport {
    state: Mutex<MockState>,
    next_message_id: AtomicU64,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            next_message_id: AtomicU64::new(1),
        }
    }

    /// Queue outcomes for the next `connect` calls, in order
    pub fn script_connects(&self, steps: impl IntoIterator<Item = ConnectStep>) {
        self.state.lock().unwrap().script.extend(steps);
    }

    pub fn set_name(&self, user_id: UserId, name: &str) {
        self.state.lock().unwrap().names.insert(user_id, name.to_string());
    }

    /// Instants of every connection attempt for a room
    pub fn attempts_for(&self, room: &RoomIdentity) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|(r, _)| r == room)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn total_attempts(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.state.lock().unwrap().posts.clone()
    }

    /// Texts posted into one room, in order
    pub fn texts_in(&self, room: &RoomIdentity) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .posts
            .iter()
            .filter(|p| &p.room == room)
            .map(|p| p.text.clone())
            .collect()
    }

    pub fn left_rooms(&self) -> Vec<RoomIdentity> {
        self.state.lock().unwrap().left.clone()
    }

    pub fn is_connected(&self, room: &RoomIdentity) -> bool {
        self.state.lock().unwrap().sinks.contains_key(room)
    }

    /// The sink registered by the last successful connect
    pub fn sink(&self, room: &RoomIdentity) -> Option<Arc<dyn ConnectionSink>> {
        self.state.lock().unwrap().sinks.get(room).cloned()
    }

    /// Simulate the connection dropping: forget the sink and tell it so
    pub async fn drop_connection(&self, room: &RoomIdentity) {
        let sink = self.state.lock().unwrap().sinks.remove(room);
        if let Some(sink) = sink {
            sink.on_disconnect(room).await;
        }
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn connect(
        &self,
        room: &RoomIdentity,
        sink: Arc<dyn ConnectionSink>,
    ) -> std::result::Result<(), ConnectError> {
        let step = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push((room.clone(), Instant::now()));
            state.script.pop_front().unwrap_or(ConnectStep::Succeed)
        };

        match step {
            ConnectStep::Succeed => {
                self.state
                    .lock()
                    .unwrap()
                    .sinks
                    .insert(room.clone(), Arc::clone(&sink));
                sink.on_connect(room).await;
                Ok(())
            }
            ConnectStep::Transient => Err(ConnectError::transient(anyhow::anyhow!(
                "websocket reset"
            ))),
            ConnectStep::Fatal => Err(ConnectError::fatal(anyhow::anyhow!("room deleted"))),
        }
    }

    async fn leave_room(&self, room: &RoomIdentity) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.sinks.remove(room);
        state.left.push(room.clone());
        Ok(())
    }

    async fn post_message(
        &self,
        room: &RoomIdentity,
        text: &str,
        flags: PostFlags,
    ) -> Result<PostedMessage> {
        self.state.lock().unwrap().posts.push(RecordedPost {
            room: room.clone(),
            text: text.to_string(),
            forced: flags.force,
        });
        Ok(PostedMessage {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            room: room.clone(),
            text: text.to_string(),
        })
    }

    async fn get_chat_users(&self, _room: &RoomIdentity, ids: &[UserId]) -> Result<Vec<ChatUser>> {
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| {
                let name = state
                    .names
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| format!("user{}", id));
                ChatUser::new(*id, name)
            })
            .collect())
    }

    async fn get_pingable_name(&self, _room: &RoomIdentity, user_id: UserId) -> Result<String> {
        let state = self.state.lock().unwrap();
        match state.names.get(&user_id) {
            Some(name) => Ok(name.replace(' ', "")),
            None => anyhow::bail!("Unknown user {}", user_id),
        }
    }

    fn is_self(&self, _host: &str, user_id: UserId) -> bool {
        user_id == MOCK_SELF_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pingable_name_strips_spaces() {
        let transport = MockTransport::new();
        let room = RoomIdentity::new("chat.example.com", 1);
        transport.set_name(7, "Jane Doe");
        assert_eq!(transport.get_pingable_name(&room, 7).await.unwrap(), "JaneDoe");
        assert!(transport.get_pingable_name(&room, 8).await.is_err());
        assert!(transport.is_self("chat.example.com", MOCK_SELF_ID));
    }
}
