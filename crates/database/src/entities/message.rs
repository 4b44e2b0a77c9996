//! Message entity definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::user::UserSummary;

/// Content that replaces a message body after logical deletion.
pub const DELETED_MESSAGE_CONTENT: &str = "This message was deleted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Durable sequence number; authoritative order for history reconstruction.
    pub seq: i64,
    pub room_id: String,
    pub sender: UserSummary,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub reply_to: Option<String>,
    pub attachments: Vec<Attachment>,
    pub read_by: Vec<ReadReceipt>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Receipt recorded for `user_id`, if any.
    pub fn receipt_for(&self, user_id: &str) -> Option<&ReadReceipt> {
        self.read_by.iter().find(|receipt| receipt.user_id == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "file" => Some(MessageKind::File),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Text
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

/// A validated message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Page selector for history reads, newest page first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: u32,
    /// Only messages with a sequence number strictly below this one.
    pub before_seq: Option<i64>,
}

impl HistoryQuery {
    pub const MAX_LIMIT: u32 = 100;

    pub fn latest(limit: u32) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            before_seq: None,
        }
    }

    pub fn before(mut self, seq: i64) -> Self {
        self.before_seq = Some(seq);
        self
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::latest(50)
    }
}
