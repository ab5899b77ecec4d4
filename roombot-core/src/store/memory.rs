// ABOUTME: In-process storage of rooms, votes, bans and aliases behind one mutex.
// ABOUTME: Nothing survives a restart; used by tests and `storage.backend = "memory"`.

use super::VoteKind;
use crate::room::{RoomIdentity, UserId};
use crate::traits::{AliasStore, BanStorage, RoomStorage};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct RoomRecord {
    invited_at: DateTime<Utc>,
    approved: bool,
    approve_votes: BTreeSet<UserId>,
    leave_votes: BTreeSet<UserId>,
}

impl RoomRecord {
    fn votes_mut(&mut self, kind: VoteKind) -> &mut BTreeSet<UserId> {
        match kind {
            VoteKind::Approve => &mut self.approve_votes,
            VoteKind::Leave => &mut self.leave_votes,
        }
    }

    fn votes(&self, kind: VoteKind) -> &BTreeSet<UserId> {
        match kind {
            VoteKind::Approve => &self.approve_votes,
            VoteKind::Leave => &self.leave_votes,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    rooms: HashMap<RoomIdentity, RoomRecord>,
    bans: HashSet<UserId>,
    aliases: HashMap<(RoomIdentity, String), String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ban(&self, user_id: UserId) {
        self.state().bans.insert(user_id);
    }

    pub fn unban(&self, user_id: UserId) -> bool {
        self.state().bans.remove(&user_id)
    }

    pub fn set_alias(&self, room: &RoomIdentity, name: &str, replacement: &str) {
        self.state()
            .aliases
            .insert((room.clone(), name.to_string()), replacement.to_string());
    }

    pub fn remove_alias(&self, room: &RoomIdentity, name: &str) -> bool {
        self.state()
            .aliases
            .remove(&(room.clone(), name.to_string()))
            .is_some()
    }

    fn with_room<T>(
        &self,
        room: &RoomIdentity,
        f: impl FnOnce(&mut RoomRecord) -> T,
    ) -> Result<T> {
        let mut state = self.state();
        match state.rooms.get_mut(room) {
            Some(record) => Ok(f(record)),
            None => anyhow::bail!("Room {} is not stored", room),
        }
    }

    fn read_votes(&self, room: &RoomIdentity, kind: VoteKind) -> BTreeSet<UserId> {
        self.state()
            .rooms
            .get(room)
            .map(|r| r.votes(kind).clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RoomStorage for MemoryStore {
    async fn is_approved(&self, room: &RoomIdentity) -> Result<bool> {
        Ok(self.state().rooms.get(room).is_some_and(|r| r.approved))
    }

    async fn set_approved(&self, room: &RoomIdentity, approved: bool) -> Result<()> {
        self.with_room(room, |r| r.approved = approved)
    }

    async fn add_room(&self, room: &RoomIdentity, invited_at: DateTime<Utc>) -> Result<()> {
        self.state().rooms.insert(
            room.clone(),
            RoomRecord {
                invited_at,
                approved: false,
                approve_votes: BTreeSet::new(),
                leave_votes: BTreeSet::new(),
            },
        );
        Ok(())
    }

    async fn remove_room(&self, room: &RoomIdentity) -> Result<()> {
        self.state().rooms.remove(room);
        Ok(())
    }

    async fn contains_room(&self, room: &RoomIdentity) -> Result<bool> {
        Ok(self.state().rooms.contains_key(room))
    }

    async fn get_all_rooms(&self) -> Result<Vec<RoomIdentity>> {
        let mut rooms: Vec<RoomIdentity> = self.state().rooms.keys().cloned().collect();
        rooms.sort();
        Ok(rooms)
    }

    async fn get_invite_timestamp(&self, room: &RoomIdentity) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state().rooms.get(room).map(|r| r.invited_at))
    }

    async fn add_approve_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<()> {
        self.with_room(room, |r| {
            r.votes_mut(VoteKind::Approve).insert(user_id);
        })
    }

    async fn get_approve_votes(&self, room: &RoomIdentity) -> Result<BTreeSet<UserId>> {
        Ok(self.read_votes(room, VoteKind::Approve))
    }

    async fn contains_approve_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<bool> {
        Ok(self.read_votes(room, VoteKind::Approve).contains(&user_id))
    }

    async fn add_leave_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<()> {
        self.with_room(room, |r| {
            r.votes_mut(VoteKind::Leave).insert(user_id);
        })
    }

    async fn get_leave_votes(&self, room: &RoomIdentity) -> Result<BTreeSet<UserId>> {
        Ok(self.read_votes(room, VoteKind::Leave))
    }

    async fn contains_leave_vote(&self, room: &RoomIdentity, user_id: UserId) -> Result<bool> {
        Ok(self.read_votes(room, VoteKind::Leave).contains(&user_id))
    }
}

#[async_trait]
impl BanStorage for MemoryStore {
    async fn is_banned(&self, user_id: UserId) -> Result<bool> {
        Ok(self.state().bans.contains(&user_id))
    }
}

#[async_trait]
impl AliasStore for MemoryStore {
    async fn get_alias(&self, room: &RoomIdentity, name: &str) -> Result<Option<String>> {
        Ok(self
            .state()
            .aliases
            .get(&(room.clone(), name.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomIdentity {
        RoomIdentity::new("chat.example.com", 11)
    }

    #[tokio::test]
    async fn test_room_lifecycle() {
        let store = MemoryStore::new();
        let invited = Utc::now();

        assert!(!store.contains_room(&room()).await.unwrap());
        store.add_room(&room(), invited).await.unwrap();
        assert!(store.contains_room(&room()).await.unwrap());
        assert_eq!(store.get_invite_timestamp(&room()).await.unwrap(), Some(invited));
        assert!(!store.is_approved(&room()).await.unwrap());

        store.add_approve_vote(&room(), 3).await.unwrap();
        store.add_approve_vote(&room(), 3).await.unwrap();
        store.add_leave_vote(&room(), 4).await.unwrap();
        assert_eq!(store.get_approve_votes(&room()).await.unwrap().len(), 1);
        assert!(store.contains_leave_vote(&room(), 4).await.unwrap());
        assert!(!store.contains_approve_vote(&room(), 4).await.unwrap());

        store.set_approved(&room(), true).await.unwrap();
        assert!(store.is_approved(&room()).await.unwrap());

        store.remove_room(&room()).await.unwrap();
        assert!(!store.contains_room(&room()).await.unwrap());
        assert!(store.get_approve_votes(&room()).await.unwrap().is_empty());
        assert!(!store.is_approved(&room()).await.unwrap());
    }

    #[tokio::test]
    async fn test_votes_on_unknown_room_fail() {
        let store = MemoryStore::new();
        assert!(store.add_approve_vote(&room(), 1).await.is_err());
        assert!(store.set_approved(&room(), true).await.is_err());
    }

    #[tokio::test]
    async fn test_bans_and_aliases() {
        let store = MemoryStore::new();
        store.ban(9);
        assert!(store.is_banned(9).await.unwrap());
        assert!(store.unban(9));
        assert!(!store.is_banned(9).await.unwrap());

        store.set_alias(&room(), "hi", "echo hello");
        assert_eq!(
            store.get_alias(&room(), "hi").await.unwrap().as_deref(),
            Some("echo hello")
        );
        let other = RoomIdentity::new("chat.example.com", 12);
        assert_eq!(store.get_alias(&other, "hi").await.unwrap(), None);
        assert!(store.remove_alias(&room(), "hi"));
    }
}
