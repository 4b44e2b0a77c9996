//! SQLite-backed [`ChatStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::entities::{
    CreateRoomRequest, CreateUserRequest, HistoryQuery, MemberRole, Message, NewMessage,
    PresenceUpdate, Room, RoomMember, User,
};
use crate::repos::{MessageRepository, RoomRepository, UserRepository};
use crate::store::ChatStore;
use crate::types::StoreResult;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    users: UserRepository,
    rooms: RoomRepository,
    messages: MessageRepository,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            rooms: RoomRepository::new(pool.clone()),
            messages: MessageRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_user(&self, request: &CreateUserRequest) -> StoreResult<User> {
        self.users.create(request).await
    }

    pub async fn create_room(&self, request: &CreateRoomRequest) -> StoreResult<Room> {
        self.rooms.create(request).await
    }

    pub async fn add_member(
        &self,
        room_id: &str,
        user_id: &str,
        role: MemberRole,
    ) -> StoreResult<RoomMember> {
        self.rooms.add_member(room_id, user_id, role).await
    }

    pub async fn remove_member(&self, room_id: &str, user_id: &str) -> StoreResult<bool> {
        self.rooms.remove_member(room_id, user_id).await
    }

    pub async fn set_room_active(&self, room_id: &str, active: bool) -> StoreResult<()> {
        self.rooms.set_active(room_id, active).await
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        self.users.find_by_id(user_id).await
    }

    async fn find_room_by_membership(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> StoreResult<Option<Room>> {
        self.rooms.find_by_membership(user_id, room_id).await
    }

    async fn rooms_for_user(&self, user_id: &str) -> StoreResult<Vec<Room>> {
        self.rooms.find_for_user(user_id).await
    }

    async fn room_members(&self, room_id: &str) -> StoreResult<Vec<RoomMember>> {
        self.rooms.members(room_id).await
    }

    async fn save_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.messages.insert(&message).await
    }

    async fn find_message(&self, message_id: &str) -> StoreResult<Option<Message>> {
        self.messages.find_by_id(message_id).await
    }

    async fn list_messages(&self, room_id: &str, query: HistoryQuery) -> StoreResult<Vec<Message>> {
        self.messages.list_by_room(room_id, query).await
    }

    async fn update_user_presence(
        &self,
        user_id: &str,
        presence: PresenceUpdate,
    ) -> StoreResult<()> {
        self.users.update_presence(user_id, presence).await
    }

    async fn append_read_receipt(
        &self,
        message_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.messages.upsert_receipt(message_id, user_id, read_at).await
    }

    async fn soft_delete_message(
        &self,
        message_id: &str,
        sender_id: &str,
    ) -> StoreResult<Option<Message>> {
        self.messages.soft_delete(message_id, sender_id).await
    }
}
