//! Repository for messages and their read receipts.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, info};

use crate::entities::{
    Attachment, HistoryQuery, Message, MessageKind, NewMessage, ReadReceipt, UserSummary,
    DELETED_MESSAGE_CONTENT,
};
use crate::types::{StoreError, StoreResult};

const MESSAGE_SELECT: &str = "SELECT m.seq, m.id, m.room_id, m.sender_id, m.content, m.message_type,
            m.reply_to, m.attachments, m.deleted, m.created_at, m.updated_at,
            u.username AS sender_username, u.avatar AS sender_avatar
     FROM messages m JOIN users u ON u.id = m.sender_id";

/// Repository for message database operations
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a message and bump the room's activity timestamp
    pub async fn insert(&self, message: &NewMessage) -> StoreResult<Message> {
        let id = cuid2::create_id();
        let now = Utc::now();
        let attachments = serde_json::to_string(&message.attachments)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, room_id, sender_id, content, message_type, reply_to, attachments, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&message.room_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(&message.reply_to)
        .bind(&attachments)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE rooms SET last_activity_at = ? WHERE id = ?")
            .bind(now)
            .bind(&message.room_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(message_id = %id, room_id = %message.room_id, "persisted message");

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("message {id}")))
    }

    pub async fn find_by_id(&self, message_id: &str) -> StoreResult<Option<Message>> {
        let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?");
        let row = sqlx::query(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let receipts = self.receipts(message_id).await?;
                Ok(Some(message_from_row(&row, receipts)?))
            }
            None => Ok(None),
        }
    }

    /// Newest page selected by `query`, returned oldest first
    pub async fn list_by_room(&self, room_id: &str, query: HistoryQuery) -> StoreResult<Vec<Message>> {
        let sql = format!(
            "{MESSAGE_SELECT} WHERE m.room_id = ? AND m.seq < ? ORDER BY m.seq DESC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(room_id)
            .bind(query.before_seq.unwrap_or(i64::MAX))
            .bind(i64::from(query.limit))
            .fetch_all(&self.pool)
            .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let id: String = row.try_get("id")?;
            let receipts = self.receipts(&id).await?;
            messages.push(message_from_row(row, receipts)?);
        }
        Ok(messages)
    }

    pub async fn upsert_receipt(
        &self,
        message_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT seq FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::not_found(format!("message {message_id}")));
        }

        sqlx::query(
            "INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?, ?, ?)
             ON CONFLICT(message_id, user_id) DO UPDATE SET read_at = excluded.read_at",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn soft_delete(&self, message_id: &str, sender_id: &str) -> StoreResult<Option<Message>> {
        let result = sqlx::query(
            "UPDATE messages
             SET content = ?, message_type = 'system', attachments = '[]', deleted = 1, updated_at = ?
             WHERE id = ? AND sender_id = ?",
        )
        .bind(DELETED_MESSAGE_CONTENT)
        .bind(Utc::now())
        .bind(message_id)
        .bind(sender_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        info!(message_id, sender_id, "message deleted");
        self.find_by_id(message_id).await
    }

    async fn receipts(&self, message_id: &str) -> StoreResult<Vec<ReadReceipt>> {
        let rows = sqlx::query(
            "SELECT user_id, read_at FROM message_reads WHERE message_id = ? ORDER BY read_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ReadReceipt {
                    user_id: row.try_get("user_id")?,
                    read_at: row.try_get("read_at")?,
                })
            })
            .collect()
    }
}

fn message_from_row(row: &SqliteRow, read_by: Vec<ReadReceipt>) -> StoreResult<Message> {
    let kind: String = row.try_get("message_type")?;
    let attachments: String = row.try_get("attachments")?;
    let attachments: Vec<Attachment> = serde_json::from_str(&attachments)?;

    Ok(Message {
        id: row.try_get("id")?,
        seq: row.try_get("seq")?,
        room_id: row.try_get("room_id")?,
        sender: UserSummary {
            id: row.try_get("sender_id")?,
            username: row.try_get("sender_username")?,
            avatar: row.try_get("sender_avatar")?,
        },
        content: row.try_get("content")?,
        kind: MessageKind::parse(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown message type {kind}")))?,
        reply_to: row.try_get("reply_to")?,
        attachments,
        read_by,
        deleted: row.try_get("deleted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
