// ABOUTME: Shared wiring for integration tests: mock transport, memory store, ACL and built-ins.
// ABOUTME: Builds a controller with dispatch installed the same way the binary does.

#![allow(dead_code)]

use roombot_core::acl::StaticAcl;
use roombot_core::builtins::{ApproveCommand, InvitationHandler, JoinCommand, LeaveCommand};
use roombot_core::store::MemoryStore;
use roombot_core::testing::MockTransport;
use roombot_core::{
    ChatMessage, ChatUser, CommandResolver, CommandRouter, ConnectionSink, EventDispatcherFactory,
    Plugin, PresenceSettings, RoomIdentity, RoomPresenceController, UserId,
};
use std::sync::Arc;

pub const HOST: &str = "chat.example.com";

pub fn room(id: u64) -> RoomIdentity {
    RoomIdentity::new(HOST, id)
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub store: Arc<MemoryStore>,
    pub acl: Arc<StaticAcl>,
    pub router: Arc<CommandRouter>,
    pub controller: RoomPresenceController,
}

pub fn harness() -> Harness {
    harness_with(PresenceSettings::default(), Vec::new())
}

pub fn harness_with(settings: PresenceSettings, plugins: Vec<Arc<dyn Plugin>>) -> Harness {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MemoryStore::new());
    let acl = Arc::new(StaticAcl::new());
    let invoker = settings.invoker.clone();
    let controller =
        RoomPresenceController::new(transport.clone(), store.clone(), acl.clone(), settings);

    let mut router = CommandRouter::new(store.clone());
    router.register(Arc::new(ApproveCommand::new(controller.downgrade(), transport.clone())));
    router.register(Arc::new(LeaveCommand::new(controller.downgrade(), transport.clone())));
    router.register(Arc::new(JoinCommand::new(controller.downgrade(), transport.clone())));
    router.register_event_handler(Arc::new(InvitationHandler::new(
        controller.downgrade(),
        transport.clone(),
    )));
    for plugin in plugins {
        router.register_plugin(plugin);
    }
    let router = Arc::new(router);

    let resolver = Arc::new(CommandResolver::new(invoker, store.clone()));
    controller.install_dispatch(EventDispatcherFactory::new(
        resolver,
        Arc::clone(&router),
        transport.clone(),
        20,
    ));

    Harness {
        transport,
        store,
        acl,
        router,
        controller,
    }
}

impl Harness {
    pub fn owners(&self, room: &RoomIdentity, owners: &[UserId]) {
        self.acl.set_owners(room.clone(), owners.iter().copied());
    }

    /// Wait until every action queued so far for the room has run
    pub async fn settle(&self, room: &RoomIdentity) {
        self.controller
            .queues()
            .enqueue(room, async {})
            .await
            .unwrap();
    }

    /// Deliver a chat message through the room's connected dispatcher
    pub async fn say(&self, room: &RoomIdentity, message_id: u64, user: UserId, text: &str) {
        let sink = self.transport.sink(room).expect("room is not connected");
        sink.on_message_event(ChatMessage::new(
            message_id,
            room.clone(),
            ChatUser::new(user, format!("user{}", user)),
            text,
        ))
        .await;
    }
}
