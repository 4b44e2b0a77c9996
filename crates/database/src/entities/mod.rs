//! Domain entities for the storage layer

pub mod message;
pub mod room;
pub mod user;

pub use message::{
    Attachment, HistoryQuery, Message, MessageKind, NewMessage, ReadReceipt,
    DELETED_MESSAGE_CONTENT,
};
pub use room::{CreateRoomRequest, MemberRole, Room, RoomKind, RoomMember};
pub use user::{CreateUserRequest, PresenceUpdate, User, UserSummary};
