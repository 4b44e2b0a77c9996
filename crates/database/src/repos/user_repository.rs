//! Repository for user data access operations.

use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

use crate::entities::{CreateUserRequest, PresenceUpdate, User};
use crate::types::{StoreError, StoreResult};

/// Repository for user database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: &CreateUserRequest) -> StoreResult<User> {
        let id = cuid2::create_id();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO users (id, username, email, avatar, is_online, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.avatar)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(user_id = %id, username = %request.username, "created user");

        Ok(User {
            id,
            username: request.username.clone(),
            email: request.email.clone(),
            avatar: request.avatar.clone(),
            is_online: false,
            last_seen: None,
            created_at: now,
        })
    }

    pub async fn find_by_id(&self, user_id: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, avatar, is_online, last_seen, created_at
             FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| user_from_row(&row)).transpose()
    }

    pub async fn update_presence(&self, user_id: &str, presence: PresenceUpdate) -> StoreResult<()> {
        let result = if presence.online {
            sqlx::query("UPDATE users SET is_online = 1 WHERE id = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query("UPDATE users SET is_online = 0, last_seen = ? WHERE id = ?")
                .bind(presence.last_seen.unwrap_or_else(Utc::now))
                .bind(user_id)
                .execute(&self.pool)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("user {user_id}")));
        }

        Ok(())
    }
}

fn user_from_row(row: &SqliteRow) -> StoreResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        avatar: row.try_get("avatar")?,
        is_online: row.try_get("is_online")?,
        last_seen: row.try_get("last_seen")?,
        created_at: row.try_get("created_at")?,
    })
}
