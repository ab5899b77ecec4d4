// ABOUTME: Stdin/stdout chat transport for running the bot locally without a chat server.
// ABOUTME: Each input line is a message or a slash directive; every post is printed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use roombot_core::traits::event_types;
use roombot_core::{
    ChatMessage, ChatTransport, ChatUser, ConnectError, ConnectionSink, PostFlags, PostedMessage,
    RoomIdentity, UserId, WebSocketEvent,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// The bot's own user id on the console
pub const CONSOLE_SELF_ID: UserId = 0;

const HELP: &str = "\
/room <host:id>                 switch the room your lines are sent to
/user <id>                      speak as another user
/event <type> [global] [room]   inject a websocket event (room = subject room id)
/raw <json>                     inject a websocket event given as JSON
/rooms                          list connected rooms
/quit                           exit";

type SharedWriter = tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>;

pub struct ConsoleTransport {
    out: SharedWriter,
    sinks: Mutex<HashMap<RoomIdentity, Arc<dyn ConnectionSink>>>,
    next_id: AtomicU64,
}

impl ConsoleTransport {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(tokio::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            out: tokio::sync::Mutex::new(out),
            sinks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn print(&self, line: &str) -> Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(format!("{}\n", line).as_bytes())
            .await
            .context("Failed to write console output")?;
        out.flush().await.context("Failed to flush console output")?;
        Ok(())
    }

    pub fn sink(&self, room: &RoomIdentity) -> Option<Arc<dyn ConnectionSink>> {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .cloned()
    }

    pub fn connected_rooms(&self) -> Vec<RoomIdentity> {
        let mut rooms: Vec<RoomIdentity> = self
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        rooms.sort();
        rooms
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn connect(
        &self,
        room: &RoomIdentity,
        sink: Arc<dyn ConnectionSink>,
    ) -> std::result::Result<(), ConnectError> {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room.clone(), Arc::clone(&sink));
        self.print(&format!("* connected to {}", room))
            .await
            .map_err(ConnectError::Fatal)?;
        sink.on_connect(room).await;
        Ok(())
    }

    async fn leave_room(&self, room: &RoomIdentity) -> Result<()> {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room);
        self.print(&format!("* left {}", room)).await
    }

    async fn post_message(
        &self,
        room: &RoomIdentity,
        text: &str,
        flags: PostFlags,
    ) -> Result<PostedMessage> {
        let marker = if flags.force { "!" } else { "" };
        self.print(&format!("[{}] bot{}: {}", room, marker, text))
            .await?;
        Ok(PostedMessage {
            id: self.next_id(),
            room: room.clone(),
            text: text.to_string(),
        })
    }

    async fn get_chat_users(&self, _room: &RoomIdentity, ids: &[UserId]) -> Result<Vec<ChatUser>> {
        Ok(ids
            .iter()
            .map(|id| ChatUser::new(*id, format!("user{}", id)))
            .collect())
    }

    async fn get_pingable_name(&self, _room: &RoomIdentity, user_id: UserId) -> Result<String> {
        Ok(format!("user{}", user_id))
    }

    fn is_self(&self, _host: &str, user_id: UserId) -> bool {
        user_id == CONSOLE_SELF_ID
    }
}

/// One parsed line of console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Empty,
    Message(String),
    Event(WebSocketEvent),
    SwitchRoom(RoomIdentity),
    SwitchUser(UserId),
    ListRooms,
    Help,
    Quit,
}

/// Parse a console line in the context of the current room and user
pub fn parse_line(line: &str, room: &RoomIdentity, user: UserId, id: u64) -> Result<ConsoleInput> {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return Ok(ConsoleInput::Empty);
    }
    let Some(directive) = line.strip_prefix('/') else {
        return Ok(ConsoleInput::Message(line.to_string()));
    };

    let (name, rest) = directive
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((directive, ""));
    match name {
        "quit" | "exit" => Ok(ConsoleInput::Quit),
        "help" => Ok(ConsoleInput::Help),
        "rooms" => Ok(ConsoleInput::ListRooms),
        "room" => Ok(ConsoleInput::SwitchRoom(rest.parse()?)),
        "user" => Ok(ConsoleInput::SwitchUser(
            rest.parse().with_context(|| format!("'{}' is not a user id", rest))?,
        )),
        "raw" => {
            let event: WebSocketEvent =
                serde_json::from_str(rest).context("Invalid websocket event JSON")?;
            Ok(ConsoleInput::Event(event))
        }
        "event" => {
            let mut args = rest.split_whitespace();
            let event_type: u32 = args
                .next()
                .context("Usage: /event <type> [global] [room]")?
                .parse()
                .context("Event type must be a number")?;
            let mut global = false;
            let mut subject = None;
            for arg in args {
                match arg {
                    "global" => global = true,
                    other => {
                        subject = Some(
                            other
                                .parse::<u64>()
                                .with_context(|| format!("'{}' is not a room id", other))?,
                        )
                    }
                }
            }

            let mut event = if global {
                WebSocketEvent::global_event(id, event_type, room.host.clone())
            } else {
                WebSocketEvent::room_event(id, event_type, room.clone())
            }
            .with_user(user);
            if let Some(subject) = subject {
                event = event.with_subject_room(subject);
            }
            if event_type == event_types::INVITATION {
                event = event.with_target_user(CONSOLE_SELF_ID);
            }
            Ok(ConsoleInput::Event(event))
        }
        other => anyhow::bail!("Unknown directive /{} (try /help)", other),
    }
}

/// Feed console input into the connected rooms until EOF or `/quit`
pub async fn run_console<R>(
    input: R,
    transport: Arc<ConsoleTransport>,
    mut room: RoomIdentity,
    mut user: UserId,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut next_id: u64 = 1;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let id = next_id;
        next_id += 1;

        let parsed = match parse_line(&line, &room, user, id) {
            Ok(parsed) => parsed,
            Err(e) => {
                transport.print(&format!("* {:#}", e)).await?;
                continue;
            }
        };

        match parsed {
            ConsoleInput::Empty => {}
            ConsoleInput::Quit => break,
            ConsoleInput::Help => transport.print(HELP).await?,
            ConsoleInput::ListRooms => {
                for connected in transport.connected_rooms() {
                    transport.print(&format!("* {}", connected)).await?;
                }
            }
            ConsoleInput::SwitchRoom(next) => {
                transport.print(&format!("* now talking in {}", next)).await?;
                room = next;
            }
            ConsoleInput::SwitchUser(next) => {
                transport.print(&format!("* now speaking as user{}", next)).await?;
                user = next;
            }
            ConsoleInput::Message(text) => match transport.sink(&room) {
                Some(sink) => {
                    let author = ChatUser::new(user, format!("user{}", user));
                    sink.on_message_event(ChatMessage::new(id, room.clone(), author, text))
                        .await;
                }
                None => transport.print(&format!("* not connected to {}", room)).await?,
            },
            ConsoleInput::Event(event) => {
                let target = event.room.clone().unwrap_or_else(|| room.clone());
                match transport.sink(&target) {
                    Some(sink) => sink.on_websocket_event(event).await,
                    None => transport.print(&format!("* not connected to {}", target)).await?,
                }
            }
        }
    }

    tracing::info!("Console input closed");
    Ok(())
}
