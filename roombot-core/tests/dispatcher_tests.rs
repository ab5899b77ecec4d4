// ABOUTME: Integration tests for per-room dispatch: commands, plain messages, events and invitations.
// ABOUTME: Drives dispatchers through the mock transport's registered sinks.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::{harness_with, room, HOST};
use roombot_core::testing::MOCK_SELF_ID;
use roombot_core::traits::event_types;
use roombot_core::{
    ChatMessage, Command, ConnectionSink, Plugin, PresenceSettings, RoomIdentity, RoomStorage,
    WebSocketEvent,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingPlugin {
    seen: Mutex<Vec<String>>,
}

impl RecordingPlugin {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.seen.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recorder"
    }

    fn command_names(&self) -> Vec<String> {
        vec!["echo".to_string(), "approve".to_string()]
    }

    fn event_types(&self) -> Vec<u32> {
        vec![event_types::USER_ENTERED, event_types::INVITATION]
    }

    fn wants_all_messages(&self) -> bool {
        true
    }

    async fn handle_command(&self, command: &Command) -> Result<()> {
        self.push(format!("command:{}:{}", command.name, command.params.join(" ")));
        Ok(())
    }

    async fn handle_event(&self, event: &WebSocketEvent) -> Result<()> {
        self.push(format!("event:{}", event.id));
        Ok(())
    }

    async fn handle_message(&self, message: &ChatMessage) -> Result<()> {
        self.push(format!("message:{}", message.content));
        Ok(())
    }

    async fn enable_for_room(&self, room: &RoomIdentity, persist: bool) -> Result<()> {
        self.push(format!("enable:{}:{}", room, persist));
        Ok(())
    }

    async fn disable_for_room(&self, room: &RoomIdentity, persist: bool) -> Result<()> {
        self.push(format!("disable:{}:{}", room, persist));
        Ok(())
    }
}

fn setup() -> (common::Harness, Arc<RecordingPlugin>) {
    let plugin = Arc::new(RecordingPlugin::default());
    let h = harness_with(PresenceSettings::default(), vec![plugin.clone() as Arc<dyn Plugin>]);
    (h, plugin)
}

#[tokio::test]
async fn test_connect_enables_plugins_without_persisting() {
    let (h, plugin) = setup();
    let r = room(1);
    h.controller.restore_rooms(&[r.clone()]).await.unwrap();

    assert_eq!(plugin.seen(), vec![format!("enable:{}:false", r)]);
}

#[tokio::test]
async fn test_plain_messages_go_to_all_message_plugins() {
    let (h, plugin) = setup();
    let r = room(1);
    h.controller.restore_rooms(&[r.clone()]).await.unwrap();

    h.say(&r, 1, 5, "hello there").await;
    h.say(&r, 2, MOCK_SELF_ID, "my own words").await;

    assert_eq!(plugin.seen()[1..], ["message:hello there".to_string()]);
}

#[tokio::test]
async fn test_command_runs_builtin_before_plugins() {
    let (h, plugin) = setup();
    let r = room(2);
    h.owners(&r, &[1, 2, 3]);
    h.controller.add_room(&r, 42).await.unwrap();

    h.say(&r, 10, 1, "!!approve").await;
    h.say(&r, 11, 9, "!!echo a  b").await;

    let texts = h.transport.texts_in(&r);
    assert_eq!(texts.last().unwrap(), "Approval vote recorded (1/2).");
    assert!(h.store.contains_approve_vote(&r, 1).await.unwrap());
    assert_eq!(
        plugin.seen()[1..],
        ["command:approve:".to_string(), "command:echo:a b".to_string()]
    );
}

#[tokio::test]
async fn test_domain_refusal_is_replied_in_chat() {
    let (h, _plugin) = setup();
    let r = room(3);
    h.owners(&r, &[1]);
    h.controller.add_room(&r, 42).await.unwrap();

    h.say(&r, 20, 99, "!!approve").await;
    assert_eq!(h.transport.texts_in(&r).last().unwrap(), "Only room owners can vote");

    h.say(&r, 21, 1, "!!approve").await;
    h.say(&r, 22, 1, "!!approve").await;
    assert_eq!(
        h.transport.texts_in(&r).last().unwrap(),
        "This room has already been approved"
    );
}

#[tokio::test]
async fn test_banned_user_commands_are_dropped() {
    let (h, plugin) = setup();
    let r = room(4);
    h.owners(&r, &[1]);
    h.controller.add_room(&r, 42).await.unwrap();
    h.store.ban(1);
    let posted = h.transport.texts_in(&r).len();

    h.say(&r, 30, 1, "!!approve").await;
    h.say(&r, 31, 1, "just chatting").await;

    assert_eq!(h.transport.texts_in(&r).len(), posted);
    assert!(!h.store.is_approved(&r).await.unwrap());
    // Plain messages are not subject to the ban check
    assert_eq!(plugin.seen().last().unwrap(), "message:just chatting");
}

#[tokio::test]
async fn test_alias_expands_to_command() {
    let (h, plugin) = setup();
    let r = room(5);
    h.controller.restore_rooms(&[r.clone()]).await.unwrap();
    h.store.set_alias(&r, "hi", "echo hello world");

    h.say(&r, 40, 3, "!!hi").await;
    assert_eq!(plugin.seen().last().unwrap(), "command:echo:hello world");
}

#[tokio::test]
async fn test_room_events_reach_plugins_but_global_events_do_not() {
    let (h, plugin) = setup();
    let a = room(6);
    let b = room(7);
    h.controller.restore_rooms(&[a.clone(), b.clone()]).await.unwrap();
    let baseline = plugin.seen().len();

    let sink = h.transport.sink(&a).unwrap();
    sink.on_websocket_event(WebSocketEvent::room_event(100, event_types::USER_ENTERED, a.clone()))
        .await;
    // Room events are never deduplicated
    sink.on_websocket_event(WebSocketEvent::room_event(100, event_types::USER_ENTERED, a.clone()))
        .await;
    sink.on_websocket_event(WebSocketEvent::global_event(101, event_types::INVITATION, HOST))
        .await;

    assert_eq!(
        plugin.seen()[baseline..],
        ["event:100".to_string(), "event:100".to_string()]
    );
}

#[tokio::test]
async fn test_invitation_is_handled_once_across_rooms() {
    let (h, _plugin) = setup();
    let a = room(8);
    let b = room(9);
    h.controller.restore_rooms(&[a.clone(), b.clone()]).await.unwrap();
    h.transport.set_name(42, "Alice");

    let invite = WebSocketEvent::global_event(500, event_types::INVITATION, HOST)
        .with_user(42)
        .with_target_user(MOCK_SELF_ID)
        .with_subject_room(77);
    h.transport.sink(&a).unwrap().on_websocket_event(invite.clone()).await;
    h.transport.sink(&b).unwrap().on_websocket_event(invite).await;

    let invited = room(77);
    assert!(h.store.contains_room(&invited).await.unwrap());
    assert_eq!(h.transport.attempts_for(&invited).len(), 1);
    assert!(h.transport.texts_in(&invited)[0].contains("@Alice"));

    // Invitations aimed at another user are ignored
    let other = WebSocketEvent::global_event(501, event_types::INVITATION, HOST)
        .with_user(42)
        .with_target_user(5)
        .with_subject_room(78);
    h.transport.sink(&a).unwrap().on_websocket_event(other).await;
    assert!(!h.store.contains_room(&room(78)).await.unwrap());
}

#[tokio::test]
async fn test_join_command_admits_target_room() {
    let (h, _plugin) = setup();
    let here = room(10);
    h.controller.restore_rooms(&[here.clone()]).await.unwrap();
    let target = room(11);
    h.owners(&target, &[3, 4, 5]);

    h.say(&here, 50, 3, &format!("!!join {} 11", HOST)).await;
    assert!(h.store.contains_room(&target).await.unwrap());
    assert_eq!(
        h.transport.texts_in(&here).last().unwrap(),
        &format!("Joined {} (1/2 approvals).", target)
    );
}
