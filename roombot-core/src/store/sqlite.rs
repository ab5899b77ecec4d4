// ABOUTME: SQLite-backed storage for rooms, votes, bans and aliases.
// ABOUTME: Survives restarts so admitted rooms and their timers can be restored.

use super::VoteKind;
use crate::room::{RoomIdentity, UserId};
use crate::traits::{AliasStore, BanStorage, RoomStorage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories as needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        let store = Self::from_connection(conn)?;
        tracing::info!(db = %path.display(), "SqliteStore initialized");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rooms (
                host TEXT NOT NULL,
                room_id INTEGER NOT NULL,
                invited_at TEXT NOT NULL,
                approved INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (host, room_id)
            );
            CREATE TABLE IF NOT EXISTS room_votes (
                host TEXT NOT NULL,
                room_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (host, room_id, kind, user_id)
            );
            CREATE TABLE IF NOT EXISTS bans (
                user_id INTEGER PRIMARY KEY,
                reason TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS aliases (
                host TEXT NOT NULL,
                room_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                replacement TEXT NOT NULL,
                PRIMARY KEY (host, room_id, name)
            );",
        )
        .context("Failed to create storage schema")?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }

    pub fn ban(&self, user_id: UserId, reason: Option<&str>) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO bans (user_id, reason, created_at) VALUES (?1, ?2, ?3)",
            params![user_id as i64, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn unban(&self, user_id: UserId) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM bans WHERE user_id = ?1", params![user_id as i64])?;
        Ok(removed > 0)
    }

    pub fn set_alias(&self, room: &RoomIdentity, name: &str, replacement: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO aliases (host, room_id, name, replacement) VALUES (?1, ?2, ?3, ?4)",
            params![room.host, room.room_id as i64, name, replacement],
        )?;
        Ok(())
    }

    pub fn remove_alias(&self, room: &RoomIdentity, name: &str) -> Result<bool> {
        let removed = self.conn()?.execute(
            "DELETE FROM aliases WHERE host = ?1 AND room_id = ?2 AND name = ?3",
            params![room.host, room.room_id as i64, name],
        )?;
        Ok(removed > 0)
    }

    fn add_vote(&self, room: &RoomIdentity, kind: VoteKind, user_id: UserId) -> Result<()> {
        let db = self.conn()?;
        if !room_exists(&db, room)? {
            anyhow::bail!("Room {} is not stored", room);
        }
        db.execute(
            "INSERT OR IGNORE INTO room_votes (host, room_id, kind, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                room.host,
                room.room_id as i64,
                kind.as_str(),
                user_id as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn votes(&self, room: &RoomIdentity, kind: VoteKind) -> Result<BTreeSet<UserId>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT user_id FROM room_votes WHERE host = ?1 AND room_id = ?2 AND kind = ?3",
        )?;
        let rows = stmt.query_map(
            params![room.host, room.room_id as i64, kind.as_str()],
            |row| row.get::<_, i64>(0),
        )?;
        let mut votes = BTreeSet::new();
        for row in rows {
            votes.insert(row? as UserId);
        }
        Ok(votes)
    }

    fn has_vote(&self, room: &RoomIdentity, kind: VoteKind, user_id: UserId) -> Result<bool> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM room_votes WHERE host = ?1 AND room_id = ?2 AND kind = ?3 AND user_id = ?4",
                params![room.host, room.room_id as i64, kind.as_str(), user_id as i64],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn room_exists(db: &Connection, room: &RoomIdentity) -> Result<bool> {
    let found = db
        .query_row(
            "SELECT 1 FROM rooms WHERE host = ?1 AND room_id = ?2",
            params![room.host, room.room_id as i64],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl RoomStorage for SqliteStore {
    async fn is_approved(&self, room: &RoomIdentity) -> Result<bool> {
        let approved = self
            .conn()?
            .query_row(
                "SELECT approved FROM rooms WHERE host = ?1 AND room_id = ?2",
                params![room.host, room.room_id as i64],
                |row| row.get::<_, i32>(0),
            )
            .optional()?;
        Ok(approved.is_some_and(|a| a != 0))
    }

    async fn set_approved(&self, room: &RoomIdentity, approved: bool) -> Result<()> {
        let updated = self.conn()?.execute(
            "UPDATE rooms SET approved = ?3 WHERE host = ?1 AND room_id = ?2",
            params![room.host, room.room_id as i64, approved as i32],
        )?;
        if updated == 0 {
            anyhow::bail!("Room {} is not stored", room);
        }
        Ok(())
    }

    async fn add_room(&self, room: &RoomIdentity, invited_at: DateTime<Utc>) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        // A re-added room starts clean
        tx.execute(
            "DELETE FROM room_votes WHERE host = ?1 AND room_id = ?2",
            params![room.host, room.room_id as i64],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO rooms (host, room_id, invited_at, approved) VALUES (?1, ?2, ?3, 0)",
            params![room.host, room.room_id as i64, invited_at.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn remove_room(&self, room: &RoomIdentity) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM room_votes WHERE host = ?1 AND room_id = ?2",
            params![room.host, room.room_id as i64],
        )?;
        tx.execute(
            "DELETE FROM rooms WHERE host = ?1 AND room_id = ?2",
            params![room.host, room.room_id as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn contains_room(&self, room: &RoomIdentity) -> Result<bool> {
        let db = self.conn()?;
        room_exists(&db, room)
    }

    async fn get_all_rooms(&self) -> Result<Vec<RoomIdentity>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT host, room_id FROM rooms ORDER BY host, room_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(RoomIdentity::new(
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u64,
            ))
        })?;
        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }

    async fn get_invite_timestamp(&self, room: &RoomIdentity) -> Result<Option<DateTime<Utc>>> {
        let raw = self
            .conn()?
            .query_row(
                "SELECT invited_at FROM rooms WHERE host = ?1 AND room_id = ?2",
                params![room.host, room.room_id as i64],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.map(|ts| {
            DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("Invalid invite timestamp for {}: {}", room, ts))
        })
        .transpose()
    }

    async fn add_approve_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<()> {
        self.add_vote(room, VoteKind::Approve, user_id)
    }

    async fn get_approve_votes(&self, room: &RoomIdentity) -> Result<BTreeSet<UserId>> {
        self.votes(room, VoteKind::Approve)
    }

    async fn contains_approve_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<bool> {
        self.has_vote(room, VoteKind::Approve, user_id)
    }

    async fn add_leave_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<()> {
        self.add_vote(room, VoteKind::Leave, user_id)
    }

    async fn get_leave_votes(&self, room: &RoomIdentity) -> Result<BTreeSet<UserId>> {
        self.votes(room, VoteKind::Leave)
    }

    async fn contains_leave_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<bool> {
        self.has_vote(room, VoteKind::Leave, user_id)
    }
}

#[async_trait]
impl BanStorage for SqliteStore {
    async fn is_banned(&self, user_id: UserId) -> Result<bool> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM bans WHERE user_id = ?1",
                params![user_id as i64],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl AliasStore for SqliteStore {
    async fn get_alias(&self, room: &RoomIdentity, name: &str) -> Result<Option<String>> {
        let replacement = self
            .conn()?
            .query_row(
                "SELECT replacement FROM aliases WHERE host = ?1 AND room_id = ?2 AND name = ?3",
                params![room.host, room.room_id as i64, name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(replacement)
    }
}
