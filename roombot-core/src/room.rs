// ABOUTME: Room identity (chat host + numeric room id) used to key all per-room state.
// ABOUTME: Parses and renders the "host:room_id" ident string used in config and storage.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric chat user id
pub type UserId = u64;

/// A chat room on a specific chat host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomIdentity {
    /// Chat host, e.g. "chat.stackexchange.com"
    pub host: String,
    /// Numeric room id on that host
    pub room_id: u64,
}

impl RoomIdentity {
    pub fn new(host: impl Into<String>, room_id: u64) -> Self {
        Self {
            host: host.into(),
            room_id,
        }
    }

    /// The ident string used as a map and storage key
    pub fn ident(&self) -> String {
        format!("{}:{}", self.host, self.room_id)
    }
}

impl fmt::Display for RoomIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.room_id)
    }
}

impl FromStr for RoomIdentity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // Hosts never contain ':' so the last separator splits off the id
        let (host, id) = s
            .trim()
            .rsplit_once(':')
            .with_context(|| format!("Room ident '{}' must look like host:room_id", s))?;
        if host.is_empty() {
            anyhow::bail!("Room ident '{}' has an empty host", s);
        }
        let room_id = id
            .parse::<u64>()
            .with_context(|| format!("Room id in '{}' must be a number", s))?;
        Ok(Self::new(host, room_id))
    }
}
