// ABOUTME: Per-room event sink fed by the transport: routes messages, commands and websocket events.
// ABOUTME: The factory shares one global-event dedup buffer across every room's dispatcher.

use crate::commands::CommandResolver;
use crate::dedup::EventDedupBuffer;
use crate::metrics;
use crate::presence::WeakPresence;
use crate::room::RoomIdentity;
use crate::router::{guarded, CommandRouter};
use crate::traits::{ChatMessage, ChatTransport, ConnectionSink, WebSocketEvent};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

/// Builds one `EventDispatcher` per room, all sharing the same router and dedup buffer
#[derive(Clone)]
pub struct EventDispatcherFactory {
    resolver: Arc<CommandResolver>,
    router: Arc<CommandRouter>,
    transport: Arc<dyn ChatTransport>,
    dedup: Arc<Mutex<EventDedupBuffer>>,
}

impl EventDispatcherFactory {
    pub fn new(
        resolver: Arc<CommandResolver>,
        router: Arc<CommandRouter>,
        transport: Arc<dyn ChatTransport>,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            resolver,
            router,
            transport,
            dedup: Arc::new(Mutex::new(EventDedupBuffer::new(dedup_capacity))),
        }
    }

    pub fn create(&self, room: &RoomIdentity, presence: WeakPresence) -> Arc<EventDispatcher> {
        Arc::new(EventDispatcher {
            room: room.clone(),
            resolver: Arc::clone(&self.resolver),
            router: Arc::clone(&self.router),
            transport: Arc::clone(&self.transport),
            dedup: Arc::clone(&self.dedup),
            presence,
        })
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }
}

/// Event sink for one room connection
pub struct EventDispatcher {
    room: RoomIdentity,
    resolver: Arc<CommandResolver>,
    router: Arc<CommandRouter>,
    transport: Arc<dyn ChatTransport>,
    dedup: Arc<Mutex<EventDedupBuffer>>,
    presence: WeakPresence,
}

impl EventDispatcher {
    pub fn room(&self) -> &RoomIdentity {
        &self.room
    }

    /// True the first time a global event id is seen anywhere in the process
    fn first_delivery(&self, event_id: u64) -> bool {
        self.dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check_and_mark(event_id)
    }
}

#[async_trait]
impl ConnectionSink for EventDispatcher {
    async fn on_connect(&self, room: &RoomIdentity) {
        tracing::info!(room = %room, "Room connected, enabling plugins");
        for plugin in self.router.plugins().all() {
            guarded("plugin_enable", room.room_id, plugin.enable_for_room(room, false)).await;
        }
    }

    async fn on_disconnect(&self, room: &RoomIdentity) {
        tracing::info!(room = %room, "Room disconnected, disabling plugins");
        for plugin in self.router.plugins().all() {
            guarded("plugin_disable", room.room_id, plugin.disable_for_room(room, false)).await;
        }

        match self.presence.upgrade() {
            // The queued reconnect logs its own outcome
            Some(presence) => drop(presence.process_disconnect(room)),
            None => tracing::debug!(room = %room, "No presence controller, not reconnecting"),
        }
    }

    async fn on_message_event(&self, message: ChatMessage) {
        if self.transport.is_self(&message.room.host, message.user.id) {
            tracing::trace!(message_id = message.id, "Ignoring own message");
            return;
        }

        let message = Arc::new(message);
        if !self.resolver.is_command_message(&message) {
            self.router.route_message(&message).await;
            return;
        }

        let message_id = message.id;
        let Some(command) = guarded(
            "resolve_command",
            message_id,
            self.resolver.build_command(Arc::clone(&message)),
        )
        .await
        else {
            return;
        };

        tracing::debug!(
            room = %command.room(),
            command = %command.name,
            user_id = command.user_id(),
            message_id,
            "Dispatching command"
        );
        self.router.route_command(&command).await;
    }

    async fn on_websocket_event(&self, event: WebSocketEvent) {
        if !event.is_global() {
            metrics::record_event(false);
            self.router.route_builtin_event(&event).await;
            self.router.route_plugin_event(&event).await;
            return;
        }

        if !self.first_delivery(event.id) {
            metrics::record_duplicate_event();
            tracing::trace!(event_id = event.id, room = %self.room, "Dropping duplicate global event");
            return;
        }

        metrics::record_event(true);
        // Plugins only receive room-scoped events
        self.router.route_builtin_event(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::MockTransport;

    #[tokio::test]
    async fn test_dispatchers_share_dedup_buffer() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let factory = EventDispatcherFactory::new(
            Arc::new(CommandResolver::new("!!", store.clone())),
            Arc::new(CommandRouter::new(store)),
            transport,
            4,
        );

        let a = factory.create(&RoomIdentity::new("chat.example.com", 1), WeakPresence::detached());
        let b = factory.create(&RoomIdentity::new("chat.example.com", 2), WeakPresence::detached());

        assert!(a.first_delivery(10));
        assert!(!b.first_delivery(10));
        assert!(b.first_delivery(11));
        assert_eq!(a.room().room_id, 1);
    }
}
