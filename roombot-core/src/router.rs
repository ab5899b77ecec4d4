// ABOUTME: Registries of built-in commands, built-in event handlers and plugins.
// ABOUTME: Routes commands, plain messages and events to them behind a global ban check.

use crate::commands::Command;
use crate::metrics;
use crate::traits::{BanStorage, BuiltInCommand, ChatMessage, EventHandler, Plugin, WebSocketEvent};
use anyhow::Result;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Run one handler invocation, logging any error or panic against the originating id.
///
/// Returns `None` if the handler failed.
pub(crate) async fn guarded<T, F>(stage: &'static str, origin_id: u64, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            metrics::record_handler_error(stage);
            tracing::error!(stage, origin_id, error = %e, "Handler failed");
            None
        }
        Err(panic) => {
            metrics::record_handler_error(stage);
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(stage, origin_id, panic = %reason, "Handler panicked");
            None
        }
    }
}

/// What `CommandRouter::handle` did with a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Issuer is globally banned, or the ban lookup failed; nothing ran
    Banned,
    /// A built-in handled the command
    Handled,
    /// No built-in is registered under that name
    Unmatched,
}

// =============================================================================
// Plugin Registry
// =============================================================================

/// Plugins indexed by what they want to receive, in registration order
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    message_plugins: Vec<Arc<dyn Plugin>>,
    command_plugins: HashMap<String, Vec<Arc<dyn Plugin>>>,
    event_plugins: HashMap<u32, Vec<Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        tracing::info!(plugin = plugin.name(), "Registering plugin");
        if plugin.wants_all_messages() {
            self.message_plugins.push(Arc::clone(&plugin));
        }
        for name in plugin.command_names() {
            self.command_plugins
                .entry(name)
                .or_default()
                .push(Arc::clone(&plugin));
        }
        for event_type in plugin.event_types() {
            self.event_plugins
                .entry(event_type)
                .or_default()
                .push(Arc::clone(&plugin));
        }
        self.plugins.push(plugin);
    }

    pub fn all(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn message_plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.message_plugins
    }

    pub fn command_plugins(&self, name: &str) -> &[Arc<dyn Plugin>] {
        self.command_plugins
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn event_plugins(&self, event_type: u32) -> &[Arc<dyn Plugin>] {
        self.event_plugins
            .get(&event_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

// =============================================================================
// Command Router
// =============================================================================

/// Process-wide router, populated at startup and shared read-only afterwards
pub struct CommandRouter {
    builtins: HashMap<String, Arc<dyn BuiltInCommand>>,
    event_handlers: HashMap<u32, Vec<Arc<dyn EventHandler>>>,
    plugins: PluginRegistry,
    bans: Arc<dyn BanStorage>,
}

impl CommandRouter {
    pub fn new(bans: Arc<dyn BanStorage>) -> Self {
        Self {
            builtins: HashMap::new(),
            event_handlers: HashMap::new(),
            plugins: PluginRegistry::new(),
            bans,
        }
    }

    /// Index a built-in under every name it declares.
    /// A later registration under the same name replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn BuiltInCommand>) {
        for name in handler.command_names() {
            if self.builtins.insert(name.clone(), Arc::clone(&handler)).is_some() {
                tracing::debug!(command = %name, "Built-in command overwritten");
            }
        }
    }

    pub fn register_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        for event_type in handler.event_types() {
            self.event_handlers
                .entry(event_type)
                .or_default()
                .push(Arc::clone(&handler));
        }
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.register(plugin);
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn has_builtin(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    pub fn builtin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builtins.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Fails closed: a ban lookup error is treated as banned
    async fn issuer_banned(&self, command: &Command) -> bool {
        match self.bans.is_banned(command.user_id()).await {
            Ok(false) => false,
            Ok(true) => {
                tracing::info!(
                    user_id = command.user_id(),
                    command = %command.name,
                    room = %command.room(),
                    "Dropping command from banned user"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    origin_id = command.message.id,
                    user_id = command.user_id(),
                    error = %e,
                    "Ban lookup failed, dropping command"
                );
                true
            }
        }
    }

    /// Ban check, then the built-in registered under the command's exact name.
    ///
    /// An `Err` comes from the built-in itself.
    pub async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        if self.issuer_banned(command).await {
            return Ok(CommandOutcome::Banned);
        }
        match self.builtins.get(&command.name) {
            Some(handler) => {
                metrics::record_command(&command.name);
                handler.handle_command(command).await?;
                Ok(CommandOutcome::Handled)
            }
            None => Ok(CommandOutcome::Unmatched),
        }
    }

    /// `handle`, then every plugin registered for the name.
    /// Failures are logged per handler and never abort the remaining ones.
    pub async fn route_command(&self, command: &Command) {
        let origin_id = command.message.id;
        let outcome = guarded("builtin_command", origin_id, self.handle(command)).await;
        if outcome == Some(CommandOutcome::Banned) {
            return;
        }

        for plugin in self.plugins.command_plugins(&command.name) {
            guarded("plugin_command", origin_id, plugin.handle_command(command)).await;
        }
    }

    /// Hand a non-command message to every plugin that wants all messages
    pub async fn route_message(&self, message: &ChatMessage) {
        for plugin in self.plugins.message_plugins() {
            guarded("plugin_message", message.id, plugin.handle_message(message)).await;
        }
    }

    pub async fn route_builtin_event(&self, event: &WebSocketEvent) {
        if let Some(handlers) = self.event_handlers.get(&event.event_type) {
            for handler in handlers {
                guarded("builtin_event", event.id, handler.handle_event(event)).await;
            }
        }
    }

    pub async fn route_plugin_event(&self, event: &WebSocketEvent) {
        for plugin in self.plugins.event_plugins(event.event_type) {
            guarded("plugin_event", event.id, plugin.handle_event(event)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomIdentity;
    use crate::store::MemoryStore;
    use crate::traits::ChatUser;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        label: &'static str,
        names: Vec<String>,
        trace: Trace,
        fail: bool,
    }

    impl Recorder {
        fn new(label: &'static str, names: &[&str], trace: &Trace) -> Arc<Self> {
            Arc::new(Self {
                label,
                names: names.iter().map(|s| s.to_string()).collect(),
                trace: Arc::clone(trace),
                fail: false,
            })
        }

        fn failing(label: &'static str, names: &[&str], trace: &Trace) -> Arc<Self> {
            Arc::new(Self {
                label,
                names: names.iter().map(|s| s.to_string()).collect(),
                trace: Arc::clone(trace),
                fail: true,
            })
        }

        fn record(&self, what: &str) -> Result<()> {
            self.trace.lock().unwrap().push(format!("{}:{}", self.label, what));
            if self.fail {
                anyhow::bail!("{} failed", self.label);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BuiltInCommand for Recorder {
        fn command_names(&self) -> Vec<String> {
            self.names.clone()
        }

        async fn handle_command(&self, command: &Command) -> Result<()> {
            self.record(&command.name)
        }
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        fn command_names(&self) -> Vec<String> {
            self.names.clone()
        }

        fn wants_all_messages(&self) -> bool {
            true
        }

        async fn handle_command(&self, command: &Command) -> Result<()> {
            self.record(&command.name)
        }

        async fn handle_message(&self, message: &ChatMessage) -> Result<()> {
            self.record(&message.content)
        }
    }

    fn command(name: &str, user_id: u64) -> Command {
        let message = ChatMessage::new(
            77,
            RoomIdentity::new("chat.example.com", 1),
            ChatUser::new(user_id, "someone"),
            format!("!!{}", name),
        );
        Command::new(name, Vec::new(), Arc::new(message))
    }

    #[tokio::test]
    async fn test_builtin_last_registration_wins() {
        let trace = Trace::default();
        let mut router = CommandRouter::new(Arc::new(MemoryStore::new()));
        router.register(Recorder::new("first", &["ping", "p"], &trace));
        router.register(Recorder::new("second", &["ping"], &trace));

        assert_eq!(router.handle(&command("ping", 1)).await.unwrap(), CommandOutcome::Handled);
        assert_eq!(router.handle(&command("p", 1)).await.unwrap(), CommandOutcome::Handled);
        assert_eq!(
            router.handle(&command("nope", 1)).await.unwrap(),
            CommandOutcome::Unmatched
        );

        assert_eq!(*trace.lock().unwrap(), vec!["second:ping", "first:p"]);
        assert_eq!(router.builtin_names(), vec!["p", "ping"]);
    }

    #[tokio::test]
    async fn test_banned_user_is_dropped() {
        let trace = Trace::default();
        let store = Arc::new(MemoryStore::new());
        store.ban(66);
        let mut router = CommandRouter::new(store);
        router.register(Recorder::new("builtin", &["ping"], &trace));
        router.register_plugin(Recorder::new("plugin", &["ping"], &trace));

        assert_eq!(router.handle(&command("ping", 66)).await.unwrap(), CommandOutcome::Banned);
        router.route_command(&command("ping", 66)).await;
        assert!(trace.lock().unwrap().is_empty());
    }

    struct BrokenBans;

    #[async_trait]
    impl BanStorage for BrokenBans {
        async fn is_banned(&self, _user_id: u64) -> Result<bool> {
            anyhow::bail!("ban table unavailable")
        }
    }

    #[tokio::test]
    async fn test_ban_lookup_failure_drops_command_everywhere() {
        let trace = Trace::default();
        let mut router = CommandRouter::new(Arc::new(BrokenBans));
        router.register(Recorder::new("builtin", &["ping"], &trace));
        router.register_plugin(Recorder::new("plugin", &["ping"], &trace));

        assert_eq!(router.handle(&command("ping", 1)).await.unwrap(), CommandOutcome::Banned);
        router.route_command(&command("ping", 1)).await;
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_command_still_reaches_plugins() {
        let trace = Trace::default();
        let mut router = CommandRouter::new(Arc::new(MemoryStore::new()));
        router.register_plugin(Recorder::new("plugin", &["weather"], &trace));

        router.route_command(&command("weather", 1)).await;
        assert_eq!(*trace.lock().unwrap(), vec!["plugin:weather"]);
    }

    #[tokio::test]
    async fn test_route_command_runs_builtin_then_every_plugin() {
        let trace = Trace::default();
        let mut router = CommandRouter::new(Arc::new(MemoryStore::new()));
        router.register(Recorder::failing("builtin", &["ping"], &trace));
        router.register_plugin(Recorder::failing("plugin-a", &["ping"], &trace));
        router.register_plugin(Recorder::new("plugin-b", &["ping"], &trace));
        router.register_plugin(Recorder::new("plugin-c", &["other"], &trace));

        router.route_command(&command("ping", 1)).await;

        assert_eq!(
            *trace.lock().unwrap(),
            vec!["builtin:ping", "plugin-a:ping", "plugin-b:ping"]
        );
    }

    #[tokio::test]
    async fn test_route_message_reaches_all_message_plugins_in_order() {
        let trace = Trace::default();
        let mut router = CommandRouter::new(Arc::new(MemoryStore::new()));
        router.register_plugin(Recorder::failing("one", &[], &trace));
        router.register_plugin(Recorder::new("two", &[], &trace));

        let message = ChatMessage::new(
            5,
            RoomIdentity::new("chat.example.com", 1),
            ChatUser::new(1, "someone"),
            "hello",
        );
        router.route_message(&message).await;

        assert_eq!(*trace.lock().unwrap(), vec!["one:hello", "two:hello"]);
        assert_eq!(router.plugins().len(), 2);
    }

    #[tokio::test]
    async fn test_guarded_survives_panic() {
        let result: Option<()> = guarded("test", 1, async {
            if true {
                panic!("boom");
            }
            Ok::<(), anyhow::Error>(())
        })
        .await;
        assert!(result.is_none());

        let result = guarded("test", 2, async { Ok::<_, anyhow::Error>(5) }).await;
        assert_eq!(result, Some(5));
    }
}
