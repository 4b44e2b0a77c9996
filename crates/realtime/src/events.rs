//! Wire events exchanged over a connection.
//!
//! Frames are JSON objects of the form `{"event": "<name>", "data": {...}}`
//! with camelCase payload fields.

use roomcast_database::{Attachment, Message, MessageKind, UserSummary};
use serde::{Deserialize, Serialize};

use crate::error::{RealtimeError, RealtimeResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage(SendMessage),
    TypingStart(RoomRef),
    TypingStop(RoomRef),
    MessageRead(MessageRef),
    JoinRoom(RoomRef),
    LeaveRoom(RoomRef),
}

impl ClientEvent {
    pub fn from_json(text: &str) -> RealtimeResult<Self> {
        serde_json::from_str(text).map_err(|err| RealtimeError::invalid(err.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "send_message",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::MessageRead(_) => "message_read",
            Self::JoinRoom(_) => "join_room",
            Self::LeaveRoom(_) => "leave_room",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub content: String,
    pub room_id: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl SendMessage {
    pub fn text(room_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            room_id: room_id.into(),
            kind: MessageKind::Text,
            reply_to: None,
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: String,
}

impl RoomRef {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready(Ready),
    NewMessage(NewMessage),
    UserTyping(Typing),
    UserStopTyping(Typing),
    MessageRead(MessageRead),
    UserJoinedRoom(RoomPresence),
    UserLeftRoom(RoomPresence),
    UserOnline(Presence),
    UserOffline(Presence),
    MessageDeleted(MessageDeleted),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::NewMessage(_) => "new_message",
            Self::UserTyping(_) => "user_typing",
            Self::UserStopTyping(_) => "user_stop_typing",
            Self::MessageRead(_) => "message_read",
            Self::UserJoinedRoom(_) => "user_joined_room",
            Self::UserLeftRoom(_) => "user_left_room",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
            Self::MessageDeleted(_) => "message_deleted",
            Self::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&RealtimeError> for ServerEvent {
    fn from(error: &RealtimeError) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: error.to_string(),
            code: error.code().to_string(),
        })
    }
}

/// First event on every connection: the rooms it was subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub user_id: String,
    pub rooms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub message: Message,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub user_id: String,
    pub username: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub message_id: String,
    pub user_id: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPresence {
    pub user_id: String,
    pub user: UserSummary,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_send_message_with_defaults() {
        let event = ClientEvent::from_json(
            r#"{"event":"send_message","data":{"content":"hi","roomId":"r1"}}"#,
        )
        .unwrap();

        assert_eq!(event, ClientEvent::SendMessage(SendMessage::text("r1", "hi")));
    }

    #[test]
    fn parses_full_send_message() {
        let event = ClientEvent::from_json(
            r#"{"event":"send_message","data":{"content":"see","roomId":"r1","type":"image",
                "replyTo":"m0","attachments":[{"url":"https://x/y.png","name":"y.png","mimeType":"image/png"}]}}"#,
        )
        .unwrap();

        let ClientEvent::SendMessage(send) = event else {
            panic!("expected send_message");
        };
        assert_eq!(send.kind, MessageKind::Image);
        assert_eq!(send.reply_to.as_deref(), Some("m0"));
        assert_eq!(send.attachments[0].mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn parses_room_scoped_events() {
        let cases = [
            ("typing_start", ClientEvent::TypingStart(RoomRef::new("r"))),
            ("typing_stop", ClientEvent::TypingStop(RoomRef::new("r"))),
            ("join_room", ClientEvent::JoinRoom(RoomRef::new("r"))),
            ("leave_room", ClientEvent::LeaveRoom(RoomRef::new("r"))),
        ];

        for (name, expected) in cases {
            let text = json!({"event": name, "data": {"roomId": "r"}}).to_string();
            let parsed = ClientEvent::from_json(&text).unwrap();
            assert_eq!(parsed.name(), name);
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn rejects_unknown_events_and_missing_fields() {
        for text in [
            r#"{"event":"launch_rockets","data":{}}"#,
            r#"{"event":"join_room","data":{}}"#,
            r#"{"event":"message_read","data":{"roomId":"r"}}"#,
            r#"{"event":"send_message","data":{"content":"x","roomId":"r","type":"video"}}"#,
            "not json",
        ] {
            let err = ClientEvent::from_json(text).unwrap_err();
            assert_eq!(err.code(), "invalid_payload", "input {text}");
        }
    }

    #[test]
    fn server_events_use_event_envelope() {
        let event = ServerEvent::UserTyping(Typing {
            user_id: "u1".into(),
            username: "alice".into(),
            room_id: "r1".into(),
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "user_typing", "data": {"userId": "u1", "username": "alice", "roomId": "r1"}})
        );
    }

    #[test]
    fn offline_presence_omits_missing_user() {
        let event = ServerEvent::UserOffline(Presence {
            user_id: "u1".into(),
            user: None,
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"event": "user_offline", "data": {"userId": "u1"}}));
    }

    #[test]
    fn errors_carry_code() {
        let event = ServerEvent::from(&RealtimeError::not_a_member("r9"));
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["code"], "not_a_member");
        assert_eq!(value["data"]["message"], "not a member of room r9");
    }
}
