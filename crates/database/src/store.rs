//! The storage contract consumed by the realtime coordinator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{HistoryQuery, Message, NewMessage, PresenceUpdate, Room, RoomMember, User};
use crate::types::StoreResult;

/// Durable storage for users, rooms, membership and messages.
///
/// The coordinator never mutates membership through this trait; it only reads
/// it. Administrative writes live on the concrete stores.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// The room, if it is active and `user_id` is one of its members.
    async fn find_room_by_membership(&self, user_id: &str, room_id: &str)
        -> StoreResult<Option<Room>>;

    /// Active rooms `user_id` belongs to.
    async fn rooms_for_user(&self, user_id: &str) -> StoreResult<Vec<Room>>;

    /// Members of an active room. Unknown or inactive rooms have no members.
    async fn room_members(&self, room_id: &str) -> StoreResult<Vec<RoomMember>>;

    async fn save_message(&self, message: NewMessage) -> StoreResult<Message>;

    async fn find_message(&self, message_id: &str) -> StoreResult<Option<Message>>;

    /// A page of history in chronological order.
    async fn list_messages(&self, room_id: &str, query: HistoryQuery) -> StoreResult<Vec<Message>>;

    async fn update_user_presence(&self, user_id: &str, presence: PresenceUpdate)
        -> StoreResult<()>;

    /// Insert or refresh the receipt of `user_id` on `message_id`.
    async fn append_read_receipt(
        &self,
        message_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Logically delete a message owned by `sender_id`. `None` when the message
    /// does not exist or belongs to someone else.
    async fn soft_delete_message(&self, message_id: &str, sender_id: &str)
        -> StoreResult<Option<Message>>;
}
