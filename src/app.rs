// ABOUTME: Wires configuration, storage, transport and built-ins into a running controller.
// ABOUTME: Shared by the binary and the end-to-end tests.

use anyhow::{Context, Result};
use roombot_core::builtins::{ApproveCommand, InvitationHandler, JoinCommand, LeaveCommand};
use roombot_core::config::{Config, StorageBackend, StorageConfig};
use roombot_core::store::{MemoryStore, SqliteStore};
use roombot_core::{
    AclDataAccessor, AliasStore, BanStorage, ChatTransport, CommandResolver, CommandRouter,
    EventDispatcherFactory, RestoreSummary, RoomIdentity, RoomPresenceController, RoomStorage,
};
use std::net::SocketAddr;
use std::sync::Arc;

/// The three storage roles, usually served by one backend
#[derive(Clone)]
pub struct Storage {
    pub rooms: Arc<dyn RoomStorage>,
    pub bans: Arc<dyn BanStorage>,
    pub aliases: Arc<dyn AliasStore>,
}

impl Storage {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::Sqlite => {
                let path = config.database_path();
                let store = Arc::new(SqliteStore::open(&path)?);
                tracing::info!(db = %path.display(), "Using SQLite storage");
                Ok(Self {
                    rooms: store.clone(),
                    bans: store.clone(),
                    aliases: store,
                })
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; rooms will not survive a restart");
                Ok(Self::memory(Arc::new(MemoryStore::new())))
            }
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            rooms: store.clone(),
            bans: store.clone(),
            aliases: store,
        }
    }
}

pub struct App {
    pub controller: RoomPresenceController,
    pub router: Arc<CommandRouter>,
    pub permanent_rooms: Vec<RoomIdentity>,
}

impl App {
    pub fn build(
        config: &Config,
        transport: Arc<dyn ChatTransport>,
        storage: Storage,
        acl: Arc<dyn AclDataAccessor>,
    ) -> Result<Self> {
        let controller = RoomPresenceController::new(
            Arc::clone(&transport),
            storage.rooms,
            acl,
            config.presence_settings()?,
        );

        let mut router = CommandRouter::new(storage.bans);
        router.register(Arc::new(ApproveCommand::new(
            controller.downgrade(),
            Arc::clone(&transport),
        )));
        router.register(Arc::new(LeaveCommand::new(
            controller.downgrade(),
            Arc::clone(&transport),
        )));
        router.register(Arc::new(JoinCommand::new(
            controller.downgrade(),
            Arc::clone(&transport),
        )));
        router.register_event_handler(Arc::new(InvitationHandler::new(
            controller.downgrade(),
            Arc::clone(&transport),
        )));
        let router = Arc::new(router);
        tracing::info!(commands = ?router.builtin_names(), "Registered built-in commands");

        let resolver = Arc::new(CommandResolver::new(
            config.bot.invoker.clone(),
            storage.aliases,
        ));
        controller.install_dispatch(EventDispatcherFactory::new(
            resolver,
            Arc::clone(&router),
            transport,
            config.bot.dedup_capacity,
        ));

        Ok(Self {
            controller,
            router,
            permanent_rooms: config.rooms.permanent.clone(),
        })
    }

    /// Connect permanent rooms and bring back every stored room
    pub async fn start(&self) -> Result<RestoreSummary> {
        self.controller
            .restore_rooms(&self.permanent_rooms)
            .await
            .context("Failed to restore rooms")
    }
}

/// Serve Prometheus metrics on `addr` and register metric descriptions
pub fn install_metrics_exporter(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid metrics listen address: {}", addr))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    roombot_core::metrics::describe();
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}
