//! Repository for rooms and room membership.

use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

use crate::entities::{CreateRoomRequest, MemberRole, Room, RoomKind, RoomMember};
use crate::types::{StoreError, StoreResult};

const ROOM_COLUMNS: &str =
    "r.id, r.name, r.description, r.room_type, r.created_by, r.is_active, r.last_activity_at, r.created_at";

/// Repository for room database operations
#[derive(Clone)]
pub struct RoomRepository {
    pool: SqlitePool,
}

impl RoomRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a room and enrol its creator as admin
    pub async fn create(&self, request: &CreateRoomRequest) -> StoreResult<Room> {
        let id = cuid2::create_id();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO rooms (id, name, description, room_type, created_by, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.kind.as_str())
        .bind(&request.created_by)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO room_members (room_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(&request.created_by)
            .bind(MemberRole::Admin.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(room_id = %id, name = %request.name, "created room");

        Ok(Room {
            id,
            name: request.name.clone(),
            description: request.description.clone(),
            kind: request.kind,
            created_by: request.created_by.clone(),
            is_active: true,
            last_activity_at: None,
            created_at: now,
        })
    }

    pub async fn add_member(
        &self,
        room_id: &str,
        user_id: &str,
        role: MemberRole,
    ) -> StoreResult<RoomMember> {
        let now = Utc::now();

        sqlx::query("INSERT INTO room_members (room_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)")
            .bind(room_id)
            .bind(user_id)
            .bind(role.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;

        info!(room_id, user_id, role = %role, "added member to room");

        Ok(RoomMember {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            role,
            joined_at: now,
        })
    }

    /// Returns whether a membership row was removed
    pub async fn remove_member(&self, room_id: &str, user_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM room_members WHERE room_id = ? AND user_id = ?")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_active(&self, room_id: &str, active: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE rooms SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(room_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("room {room_id}")));
        }
        Ok(())
    }

    pub async fn find_by_membership(&self, user_id: &str, room_id: &str) -> StoreResult<Option<Room>> {
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM rooms r
             JOIN room_members m ON m.room_id = r.id
             WHERE r.id = ? AND m.user_id = ? AND r.is_active = 1"
        );
        let row = sqlx::query(&sql)
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| room_from_row(&row)).transpose()
    }

    pub async fn find_for_user(&self, user_id: &str) -> StoreResult<Vec<Room>> {
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM rooms r
             JOIN room_members m ON m.room_id = r.id
             WHERE m.user_id = ? AND r.is_active = 1
             ORDER BY r.created_at ASC"
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;

        rows.iter().map(room_from_row).collect()
    }

    pub async fn members(&self, room_id: &str) -> StoreResult<Vec<RoomMember>> {
        let rows = sqlx::query(
            "SELECT m.room_id, m.user_id, m.role, m.joined_at
             FROM room_members m JOIN rooms r ON r.id = m.room_id
             WHERE m.room_id = ? AND r.is_active = 1
             ORDER BY m.joined_at ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let role: String = row.try_get("role")?;
                Ok(RoomMember {
                    room_id: row.try_get("room_id")?,
                    user_id: row.try_get("user_id")?,
                    role: MemberRole::from(role.as_str()),
                    joined_at: row.try_get("joined_at")?,
                })
            })
            .collect()
    }
}

fn room_from_row(row: &SqliteRow) -> StoreResult<Room> {
    let kind: String = row.try_get("room_type")?;
    Ok(Room {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: RoomKind::parse(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown room type {kind}")))?,
        created_by: row.try_get("created_by")?,
        is_active: row.try_get("is_active")?,
        last_activity_at: row.try_get("last_activity_at")?,
        created_at: row.try_get("created_at")?,
    })
}
