// ABOUTME: Room ownership list loaded from configuration.
// ABOUTME: Answers owner lookups for approve/leave voting.

use crate::room::{RoomIdentity, UserId};
use crate::traits::AclDataAccessor;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

/// Owners per room, fixed at startup but replaceable at runtime
#[derive(Debug, Default)]
pub struct StaticAcl {
    owners: RwLock<HashMap<RoomIdentity, BTreeSet<UserId>>>,
}

impl StaticAcl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owners(self, room: RoomIdentity, owners: impl IntoIterator<Item = UserId>) -> Self {
        self.set_owners(room, owners);
        self
    }

    /// Replace the owner list of a room
    pub fn set_owners(&self, room: RoomIdentity, owners: impl IntoIterator<Item = UserId>) {
        let owners: BTreeSet<UserId> = owners.into_iter().collect();
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room, owners);
    }

    pub fn room_count(&self) -> usize {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl AclDataAccessor for StaticAcl {
    async fn is_room_owner(&self, room: &RoomIdentity, user_id: UserId) -> Result<bool> {
        let owners = self.owners.read().unwrap_or_else(PoisonError::into_inner);
        Ok(owners.get(room).is_some_and(|o| o.contains(&user_id)))
    }

    async fn get_room_owners(&self, room: &RoomIdentity) -> Result<Vec<UserId>> {
        let owners = self.owners.read().unwrap_or_else(PoisonError::into_inner);
        Ok(owners
            .get(room)
            .map(|o| o.iter().copied().collect())
            .unwrap_or_default())
    }
}
