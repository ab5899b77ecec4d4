// ABOUTME: Command parsing for chat messages that start with the invoker token.
// ABOUTME: Resolves room-scoped aliases with a one-hop cycle guard before routing.

use crate::room::{RoomIdentity, UserId};
use crate::traits::{AliasStore, ChatMessage};
use anyhow::Result;
use std::sync::Arc;

/// Default literal prefix marking a message as a command
pub const DEFAULT_INVOKER: &str = "!!";

/// A resolved command from a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The command name (without invoker)
    pub name: String,
    /// Whitespace-separated parameters, empty tokens dropped
    pub params: Vec<String>,
    /// The message that invoked the command
    pub message: Arc<ChatMessage>,
}

impl Command {
    pub fn new(name: impl Into<String>, params: Vec<String>, message: Arc<ChatMessage>) -> Self {
        Self {
            name: name.into(),
            params,
            message,
        }
    }

    /// Get the first parameter if present
    pub fn first_arg(&self) -> Option<&str> {
        self.params.first().map(|s| s.as_str())
    }

    /// Get a parameter by index
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|s| s.as_str())
    }

    /// Check if the command has at least `count` parameters
    pub fn has_args(&self, count: usize) -> bool {
        self.params.len() >= count
    }

    pub fn room(&self) -> &RoomIdentity {
        &self.message.room
    }

    pub fn user_id(&self) -> UserId {
        self.message.user.id
    }
}

/// Split command text (invoker already removed) into name and remainder
fn split_command(text: &str) -> (String, String) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.to_string(), rest.to_string()),
        None => (text.to_string(), String::new()),
    }
}

fn split_params(remainder: &str) -> Vec<String> {
    remainder.split_whitespace().map(str::to_string).collect()
}

/// Turns command-shaped chat messages into [`Command`] values
pub struct CommandResolver {
    invoker: String,
    aliases: Arc<dyn AliasStore>,
}

impl CommandResolver {
    pub fn new(invoker: impl Into<String>, aliases: Arc<dyn AliasStore>) -> Self {
        Self {
            invoker: invoker.into(),
            aliases,
        }
    }

    pub fn invoker(&self) -> &str {
        &self.invoker
    }

    /// True if the message content begins with the invoker token
    pub fn is_command_message(&self, message: &ChatMessage) -> bool {
        message.content.starts_with(&self.invoker)
    }

    /// Resolve a command-shaped message, following room aliases.
    ///
    /// Substitution stops when an alias would resolve back to the name that
    /// was invoked one hop earlier, so `a -> b -> a` resolves to `b` and
    /// `a -> b -> c -> b` resolves to `c`. A self-alias such as `g -> g --x`
    /// is applied exactly once. Longer cycles such as `a -> b -> c -> a` are
    /// not detected and keep resolving until the alias store fails.
    pub async fn build_command(&self, message: Arc<ChatMessage>) -> Result<Command> {
        let body = message
            .content
            .strip_prefix(&self.invoker)
            .unwrap_or(&message.content);
        let (mut name, mut remainder) = split_command(body);
        let mut previous: Option<String> = None;

        while let Some(alias) = self.aliases.get_alias(&message.room, &name).await? {
            let rewritten = if remainder.is_empty() {
                alias
            } else {
                format!("{} {}", alias, remainder)
            };
            let (next_name, next_remainder) = split_command(&rewritten);
            if previous.as_deref() == Some(next_name.as_str()) {
                tracing::debug!(
                    room = %message.room,
                    name = %name,
                    alias_target = %next_name,
                    "Alias cycle back to previous name, stopping"
                );
                break;
            }
            tracing::debug!(room = %message.room, from = %name, to = %next_name, "Resolved alias");
            previous = Some(std::mem::replace(&mut name, next_name));
            remainder = next_remainder;
        }

        Ok(Command::new(name, split_params(&remainder), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChatUser;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Alias table that fails after a fixed number of lookups
    struct TestAliases {
        table: HashMap<String, String>,
        lookups: AtomicUsize,
        fail_after: usize,
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl TestAliases {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self::failing_after(pairs, usize::MAX)
        }

        fn failing_after(pairs: &[(&str, &str)], fail_after: usize) -> Self {
            Self {
                table: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                lookups: AtomicUsize::new(0),
                fail_after,
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AliasStore for TestAliases {
        async fn get_alias(&self, _room: &RoomIdentity, name: &str) -> Result<Option<String>> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_after {
                anyhow::bail!("alias lookup budget exhausted");
            }
            self.seen.lock().unwrap().push(name.to_string());
            Ok(self.table.get(name).cloned())
        }
    }

    fn message(content: &str) -> Arc<ChatMessage> {
        Arc::new(ChatMessage::new(
            1,
            RoomIdentity::new("chat.example.com", 1),
            ChatUser::new(10, "alice"),
            content,
        ))
    }

    fn resolver(aliases: TestAliases) -> CommandResolver {
        CommandResolver::new("!!", Arc::new(aliases))
    }

    #[test]
    fn test_is_command_message() {
        let r = resolver(TestAliases::new(&[]));
        assert!(r.is_command_message(&message("!!help")));
        assert!(r.is_command_message(&message("!!")));
        assert!(!r.is_command_message(&message(" !!help")));
        assert!(!r.is_command_message(&message("!help")));
        assert!(!r.is_command_message(&message("hello !!help")));
    }

    #[tokio::test]
    async fn test_build_simple_command() {
        let r = resolver(TestAliases::new(&[]));
        let cmd = r.build_command(message("!!weather  paris   now ")).await.unwrap();
        assert_eq!(cmd.name, "weather");
        assert_eq!(cmd.params, vec!["paris", "now"]);
        assert_eq!(cmd.first_arg(), Some("paris"));
        assert_eq!(cmd.arg(2), None);
        assert!(cmd.has_args(2));
        assert_eq!(cmd.user_id(), 10);
    }

    #[tokio::test]
    async fn test_build_command_without_params() {
        let r = resolver(TestAliases::new(&[]));
        let cmd = r.build_command(message("!!help")).await.unwrap();
        assert_eq!(cmd.name, "help");
        assert!(cmd.params.is_empty());
    }

    #[tokio::test]
    async fn test_bare_invoker_yields_empty_name() {
        let r = resolver(TestAliases::new(&[]));
        let cmd = r.build_command(message("!!")).await.unwrap();
        assert_eq!(cmd.name, "");
        assert!(cmd.params.is_empty());
    }

    #[tokio::test]
    async fn test_alias_substitutes_and_keeps_params() {
        let r = resolver(TestAliases::new(&[("w", "weather --metric")]));
        let cmd = r.build_command(message("!!w paris")).await.unwrap();
        assert_eq!(cmd.name, "weather");
        assert_eq!(cmd.params, vec!["--metric", "paris"]);
    }

    #[tokio::test]
    async fn test_alias_chain_follows_multiple_hops() {
        let r = resolver(TestAliases::new(&[("a", "b"), ("b", "c")]));
        let cmd = r.build_command(message("!!a x")).await.unwrap();
        assert_eq!(cmd.name, "c");
        assert_eq!(cmd.params, vec!["x"]);
    }

    #[tokio::test]
    async fn test_two_hop_cycle_resolves_to_second_name() {
        let r = resolver(TestAliases::new(&[("a", "b"), ("b", "a")]));
        let cmd = r.build_command(message("!!a")).await.unwrap();
        assert_eq!(cmd.name, "b");
    }

    #[tokio::test]
    async fn test_cycle_back_to_previous_hop_stops_at_current_name() {
        let r = resolver(TestAliases::new(&[("a", "b"), ("b", "c"), ("c", "b")]));
        let cmd = r.build_command(message("!!a y")).await.unwrap();
        assert_eq!(cmd.name, "c");
        assert_eq!(cmd.params, vec!["y"]);
    }

    #[tokio::test]
    async fn test_self_alias_applies_once() {
        let aliases = Arc::new(TestAliases::new(&[("g", "g --x")]));
        let r = CommandResolver::new("!!", aliases.clone());

        let cmd = r.build_command(message("!!g a")).await.unwrap();
        assert_eq!(cmd.name, "g");
        assert_eq!(cmd.params, vec!["--x", "a"]);
        assert_eq!(*aliases.seen.lock().unwrap(), vec!["g", "g"]);
    }

    #[tokio::test]
    async fn test_three_hop_cycle_is_not_detected() {
        // a -> b -> c -> a keeps cycling; only the store failing ends it
        let aliases = Arc::new(TestAliases::failing_after(
            &[("a", "b"), ("b", "c"), ("c", "a")],
            30,
        ));
        let r = CommandResolver::new("!!", aliases.clone());

        let result = r.build_command(message("!!a")).await;
        assert!(result.is_err());
        assert_eq!(aliases.lookups.load(Ordering::SeqCst), 31);

        let seen = aliases.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 30);
        assert_eq!(&seen[..6], &["a", "b", "c", "a", "b", "c"]);
    }
}
