//! Read-through cache of durable room membership.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use roomcast_database::{ChatStore, MemberRole};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::{RealtimeError, RealtimeResult};

pub type RoomMembers = Arc<HashMap<String, MemberRole>>;
pub type UserRooms = Arc<Vec<String>>;

struct Cached<T> {
    value: T,
    loaded_at: Instant,
}

/// Entries live for at most `ttl` and are dropped eagerly by [`invalidate`].
///
/// Loads that started before an invalidation are not cached, so a read that
/// follows `invalidate` never observes the old membership.
///
/// [`invalidate`]: MembershipCache::invalidate
pub struct MembershipCache {
    store: Arc<dyn ChatStore>,
    ttl: Duration,
    generation: AtomicU64,
    rooms: RwLock<HashMap<String, Cached<RoomMembers>>>,
    user_rooms: RwLock<HashMap<String, Cached<UserRooms>>>,
}

impl MembershipCache {
    pub fn new(store: Arc<dyn ChatStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            generation: AtomicU64::new(0),
            rooms: RwLock::new(HashMap::new()),
            user_rooms: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_member(&self, user_id: &str, room_id: &str) -> RealtimeResult<bool> {
        Ok(self.members_of(room_id).await?.contains_key(user_id))
    }

    /// Members of an active room with their roles. Unknown rooms are empty.
    pub async fn members_of(&self, room_id: &str) -> RealtimeResult<RoomMembers> {
        if let Some(members) = self.fresh(&self.rooms, room_id).await {
            return Ok(members);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let members = self.store.room_members(room_id).await.map_err(|err| {
            error!(room_id, error = %err, "failed to load room members");
            RealtimeError::MembershipUnavailable
        })?;

        let members: RoomMembers = Arc::new(
            members
                .into_iter()
                .map(|member| (member.user_id, member.role))
                .collect(),
        );
        debug!(room_id, count = members.len(), "loaded room members");

        self.remember(&self.rooms, room_id, members.clone(), generation)
            .await;
        Ok(members)
    }

    /// Ids of the active rooms `user_id` belongs to.
    pub async fn rooms_of(&self, user_id: &str) -> RealtimeResult<UserRooms> {
        if let Some(rooms) = self.fresh(&self.user_rooms, user_id).await {
            return Ok(rooms);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let rooms = self.store.rooms_for_user(user_id).await.map_err(|err| {
            error!(user_id, error = %err, "failed to load user rooms");
            RealtimeError::MembershipUnavailable
        })?;

        let rooms: UserRooms = Arc::new(rooms.into_iter().map(|room| room.id).collect());
        self.remember(&self.user_rooms, user_id, rooms.clone(), generation)
            .await;
        Ok(rooms)
    }

    /// Forget everything known about `room_id`.
    ///
    /// Room lists of all users are dropped too since any of them may have
    /// gained or lost this room.
    pub async fn invalidate(&self, room_id: &str) {
        {
            let mut rooms = self.rooms.write().await;
            self.generation.fetch_add(1, Ordering::AcqRel);
            rooms.remove(room_id);
        }
        self.user_rooms.write().await.clear();
        debug!(room_id, "membership cache invalidated");
    }

    pub async fn invalidate_user(&self, user_id: &str) {
        let mut user_rooms = self.user_rooms.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        user_rooms.remove(user_id);
    }

    async fn fresh<T: Clone>(&self, map: &RwLock<HashMap<String, Cached<T>>>, key: &str) -> Option<T> {
        let entries = map.read().await;
        entries
            .get(key)
            .filter(|entry| entry.loaded_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    async fn remember<T>(
        &self,
        map: &RwLock<HashMap<String, Cached<T>>>,
        key: &str,
        value: T,
        generation: u64,
    ) {
        let mut entries = map.write().await;
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        entries.insert(
            key.to_string(),
            Cached {
                value,
                loaded_at: Instant::now(),
            },
        );
    }
}
