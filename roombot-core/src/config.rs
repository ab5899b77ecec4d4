// ABOUTME: Configuration parsing from TOML with environment variable overrides.
// ABOUTME: Validates invoker, capacities and timer ordering; converts into runtime settings.

use crate::acl::StaticAcl;
use crate::commands::DEFAULT_INVOKER;
use crate::dedup::DEFAULT_DEDUP_CAPACITY;
use crate::paths;
use crate::presence::PresenceSettings;
use crate::reconnect::BackoffConfig;
use crate::room::{RoomIdentity, UserId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "ROOMBOT_CONFIG_PATH";
/// File looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "roombot.toml";
/// Longest configurable grace period (one year)
pub const MAX_PRESENCE_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub reconnect: BackoffConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub acl: AclConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Prefix marking a message as a command
    #[serde(default = "default_invoker")]
    pub invoker: String,
    /// Global event ids remembered for deduplication
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            invoker: default_invoker(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Rooms the bot always stays in; never voted on, never evicted
    #[serde(default)]
    pub permanent: Vec<RoomIdentity>,
}

/// Timer offsets in hours after the invite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_first_reminder_hours")]
    pub first_reminder_hours: i64,
    #[serde(default = "default_second_reminder_hours")]
    pub second_reminder_hours: i64,
    #[serde(default = "default_eviction_hours")]
    pub eviction_hours: i64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            first_reminder_hours: default_first_reminder_hours(),
            second_reminder_hours: default_second_reminder_hours(),
            eviction_hours: default_eviction_hours(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Defaults to the XDG data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(paths::data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(paths::DATABASE_FILE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomOwners {
    pub room: RoomIdentity,
    pub owners: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AclConfig {
    #[serde(default)]
    pub rooms: Vec<RoomOwners>,
}

impl AclConfig {
    pub fn build(&self) -> StaticAcl {
        let acl = StaticAcl::new();
        for entry in &self.rooms {
            acl.set_owners(entry.room.clone(), entry.owners.iter().copied());
        }
        acl
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus listen address, e.g. "127.0.0.1:9184"; disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
}

fn default_invoker() -> String {
    DEFAULT_INVOKER.to_string()
}

fn default_dedup_capacity() -> usize {
    DEFAULT_DEDUP_CAPACITY
}

fn default_first_reminder_hours() -> i64 {
    12
}

fn default_second_reminder_hours() -> i64 {
    23
}

fn default_eviction_hours() -> i64 {
    24
}

impl Config {
    /// Load configuration, searching in order: `explicit`, `$ROOMBOT_CONFIG_PATH`,
    /// `./roombot.toml`, the XDG config file. Defaults apply when none exists.
    /// Environment overrides are applied last, then the result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::find_config_file(explicit)? {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration");
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn find_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            return Ok(Some(path.to_path_buf()));
        }
        if let Ok(val) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(val);
            if !path.exists() {
                anyhow::bail!("{} points at a missing file: {}", CONFIG_PATH_ENV, path.display());
            }
            return Ok(Some(path));
        }
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Ok(Some(local));
        }
        let xdg = paths::config_file();
        Ok(xdg.exists().then_some(xdg))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str::<Config>(content).context("Invalid configuration")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ROOMBOT_INVOKER") {
            self.bot.invoker = val;
        }
        if let Ok(val) = std::env::var("ROOMBOT_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("ROOMBOT_METRICS_ADDR") {
            self.metrics.listen_addr = if val.is_empty() { None } else { Some(val) };
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot.invoker.trim().is_empty() {
            anyhow::bail!("bot.invoker must not be empty");
        }
        if self.bot.dedup_capacity == 0 {
            anyhow::bail!("bot.dedup_capacity must be at least 1");
        }
        self.reconnect.validate()?;

        let p = &self.presence;
        if !(0 < p.first_reminder_hours
            && p.first_reminder_hours < p.second_reminder_hours
            && p.second_reminder_hours < p.eviction_hours)
        {
            anyhow::bail!(
                "presence timers must satisfy 0 < first_reminder_hours ({}) < second_reminder_hours ({}) < eviction_hours ({})",
                p.first_reminder_hours,
                p.second_reminder_hours,
                p.eviction_hours
            );
        }
        if p.eviction_hours > MAX_PRESENCE_HOURS {
            anyhow::bail!(
                "presence.eviction_hours ({}) must be at most {}",
                p.eviction_hours,
                MAX_PRESENCE_HOURS
            );
        }
        Ok(())
    }

    pub fn presence_settings(&self) -> Result<PresenceSettings> {
        let p = &self.presence;
        Ok(PresenceSettings {
            first_reminder: hours("presence.first_reminder_hours", p.first_reminder_hours)?,
            second_reminder: hours("presence.second_reminder_hours", p.second_reminder_hours)?,
            eviction: hours("presence.eviction_hours", p.eviction_hours)?,
            invoker: self.bot.invoker.clone(),
            backoff: self.reconnect.clone(),
        })
    }
}

fn hours(field: &str, value: i64) -> Result<chrono::Duration> {
    chrono::Duration::try_hours(value)
        .with_context(|| format!("{} ({}) is out of range", field, value))
}
