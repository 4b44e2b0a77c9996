//! Roomcast database crate
//!
//! Entities, the [`ChatStore`] contract the realtime core consumes, and its two
//! implementations: [`SqliteStore`] for deployments and [`MemoryStore`] for tests.

use sqlx::SqlitePool;
use roomcast_config::DatabaseConfig;

pub mod connection;
pub mod entities;
pub mod memory;
pub mod migrations;
pub mod repos;
pub mod sqlite_store;
pub mod store;
pub mod types;

pub use connection::{prepare_database, DatabaseConnection};
pub use memory::{Gate, MemoryStore};
pub use migrations::run_migrations;
pub use sqlite_store::SqliteStore;
pub use store::ChatStore;

pub use repos::{MessageRepository, RoomRepository, UserRepository};

pub use entities::{
    Attachment, CreateRoomRequest, CreateUserRequest, HistoryQuery, MemberRole, Message,
    MessageKind, NewMessage, PresenceUpdate, ReadReceipt, Room, RoomKind, RoomMember, User,
    UserSummary, DELETED_MESSAGE_CONTENT,
};

pub use types::{StoreError, StoreResult};

/// Open the pool and bring the schema up to date.
pub async fn initialize_database(config: &DatabaseConfig) -> StoreResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| StoreError::ConnectionError(format!("{e:#}")))?;

    run_migrations(&pool)
        .await
        .map_err(|e| StoreError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}
