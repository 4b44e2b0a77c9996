//! Message send, read receipts and logical deletion.

use std::sync::Arc;

use chrono::Utc;
use roomcast_config::RealtimeConfig;
use roomcast_database::{ChatStore, Message, MessageKind, NewMessage};
use tracing::{error, info, warn};

use crate::connection::Connection;
use crate::error::{RealtimeError, RealtimeResult};
use crate::events::{self, MessageDeleted, MessageRead, SendMessage, ServerEvent};
use crate::identity::Identity;
use crate::membership::MembershipCache;
use crate::router::{Recipients, RoomRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLimits {
    /// In characters, not bytes.
    pub max_length: usize,
    pub max_attachments: usize,
}

impl From<&RealtimeConfig> for MessageLimits {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            max_length: config.max_message_length,
            max_attachments: config.max_attachments,
        }
    }
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

pub struct MessagePipeline {
    store: Arc<dyn ChatStore>,
    membership: Arc<MembershipCache>,
    router: Arc<RoomRouter>,
    limits: MessageLimits,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn ChatStore>,
        membership: Arc<MembershipCache>,
        router: Arc<RoomRouter>,
        limits: MessageLimits,
    ) -> Self {
        Self {
            store,
            membership,
            router,
            limits,
        }
    }

    /// Authorize, validate, persist, then fan out to the whole room.
    ///
    /// Once the message is persisted the send has succeeded; fan-out outcomes
    /// never turn it into an error.
    pub async fn send(&self, sender: &Identity, request: SendMessage) -> RealtimeResult<Message> {
        if !self.membership.is_member(&sender.id, &request.room_id).await? {
            warn!(user_id = %sender.id, room_id = %request.room_id, "send refused, not a member");
            return Err(RealtimeError::not_a_member(&request.room_id));
        }

        self.validate(&request)?;
        if let Some(reply_to) = &request.reply_to {
            self.check_reply_target(&request.room_id, reply_to).await?;
        }

        let message = self
            .store
            .save_message(NewMessage {
                room_id: request.room_id,
                sender_id: sender.id.clone(),
                content: request.content,
                kind: request.kind,
                reply_to: request.reply_to,
                attachments: request.attachments,
            })
            .await
            .map_err(|err| {
                error!(user_id = %sender.id, error = %err, "failed to persist message");
                RealtimeError::PersistFailure
            })?;

        let fan_out = self
            .router
            .publish(
                &message.room_id,
                ServerEvent::NewMessage(events::NewMessage {
                    message: message.clone(),
                    room_id: message.room_id.clone(),
                }),
                Recipients::All,
            )
            .await;

        info!(
            message_id = %message.id,
            room_id = %message.room_id,
            user_id = %sender.id,
            delivered = fan_out.delivered,
            "message sent"
        );
        Ok(message)
    }

    fn validate(&self, request: &SendMessage) -> RealtimeResult<()> {
        if request.content.trim().is_empty() {
            return Err(RealtimeError::invalid("message content is required"));
        }
        if request.content.chars().count() > self.limits.max_length {
            return Err(RealtimeError::ContentTooLarge {
                limit: self.limits.max_length,
            });
        }
        if request.kind == MessageKind::System {
            return Err(RealtimeError::invalid("system messages cannot be sent"));
        }
        if request.attachments.len() > self.limits.max_attachments {
            return Err(RealtimeError::invalid(format!(
                "at most {} attachments are allowed",
                self.limits.max_attachments
            )));
        }
        if request
            .attachments
            .iter()
            .any(|a| a.url.trim().is_empty() || a.name.trim().is_empty())
        {
            return Err(RealtimeError::invalid("attachments need a url and a name"));
        }
        Ok(())
    }

    async fn check_reply_target(&self, room_id: &str, reply_to: &str) -> RealtimeResult<()> {
        let target = self.store.find_message(reply_to).await.map_err(|err| {
            error!(message_id = reply_to, error = %err, "failed to load reply target");
            RealtimeError::StorageUnavailable
        })?;

        match target {
            Some(message) if message.room_id == room_id => Ok(()),
            _ => Err(RealtimeError::invalid("reply target not found in this room")),
        }
    }

    /// Record that `reader` has seen a message and tell the room.
    ///
    /// Best-effort: failures are logged and nothing is published. Returns
    /// whether the receipt was recorded.
    pub async fn mark_read(&self, reader: &Connection, message_id: &str, room_id: &str) -> bool {
        let user_id = reader.user_id();
        match self.store.find_message(message_id).await {
            Ok(Some(message)) if message.room_id == room_id => {}
            Ok(_) => {
                warn!(user_id, message_id, room_id, "read receipt for unknown message");
                return false;
            }
            Err(err) => {
                error!(user_id, message_id, error = %err, "failed to load message for receipt");
                return false;
            }
        }

        if let Err(err) = self
            .store
            .append_read_receipt(message_id, user_id, Utc::now())
            .await
        {
            error!(user_id, message_id, error = %err, "failed to record read receipt");
            return false;
        }

        self.router
            .publish(
                room_id,
                ServerEvent::MessageRead(MessageRead {
                    message_id: message_id.to_string(),
                    user_id: user_id.to_string(),
                    room_id: room_id.to_string(),
                }),
                Recipients::ExceptConnection(reader.id()),
            )
            .await;
        true
    }

    /// Logically delete one of the sender's own messages.
    pub async fn delete(&self, sender: &Identity, message_id: &str) -> RealtimeResult<Message> {
        let deleted = self
            .store
            .soft_delete_message(message_id, &sender.id)
            .await
            .map_err(|err| {
                error!(message_id, user_id = %sender.id, error = %err, "failed to delete message");
                RealtimeError::StorageUnavailable
            })?
            .ok_or_else(|| RealtimeError::NotFound("message".to_string()))?;

        self.router
            .publish(
                &deleted.room_id,
                ServerEvent::MessageDeleted(MessageDeleted {
                    message_id: deleted.id.clone(),
                    room_id: deleted.room_id.clone(),
                }),
                Recipients::All,
            )
            .await;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::drain;
    use roomcast_database::{
        Attachment, CreateRoomRequest, CreateUserRequest, HistoryQuery, MemberRole, MemoryStore,
    };
    use std::time::Duration;
    use tokio::sync::mpsc;

    type Rx = mpsc::Receiver<Arc<ServerEvent>>;

    struct Fixture {
        store: Arc<MemoryStore>,
        pipeline: MessagePipeline,
        room: String,
        alice: Identity,
        alice_conn: Connection,
        alice_rx: Rx,
        bob: Identity,
        bob_rx: Rx,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let alice = store.create_user(&CreateUserRequest::named("alice")).await.unwrap();
        let bob = store.create_user(&CreateUserRequest::named("bob")).await.unwrap();
        let room = store
            .create_room(&CreateRoomRequest::public("r", &alice.id))
            .await
            .unwrap();
        store.add_member(&room.id, &bob.id, MemberRole::Member).await.unwrap();

        let dyn_store: Arc<dyn ChatStore> = store.clone();
        let membership = Arc::new(MembershipCache::new(dyn_store.clone(), Duration::from_secs(60)));
        let router = Arc::new(RoomRouter::new(membership.clone()));

        let alice = Identity::from(alice);
        let bob = Identity::from(bob);
        let (alice_conn, alice_rx) = Connection::new(alice.clone(), 16);
        let (bob_conn, bob_rx) = Connection::new(bob.clone(), 16);
        router.subscribe(&alice_conn, &room.id).await.unwrap();
        router.subscribe(&bob_conn, &room.id).await.unwrap();

        let limits = MessageLimits {
            max_length: 10,
            max_attachments: 1,
        };
        Fixture {
            store,
            pipeline: MessagePipeline::new(dyn_store, membership, router, limits),
            room: room.id,
            alice,
            alice_conn,
            alice_rx,
            bob,
            bob_rx,
        }
    }

    #[tokio::test]
    async fn sent_message_is_persisted_and_fanned_out_to_everyone() {
        let mut fx = fixture().await;
        let message = fx
            .pipeline
            .send(&fx.alice, SendMessage::text(&fx.room, "hi"))
            .await
            .unwrap();

        let expected = ServerEvent::NewMessage(events::NewMessage {
            message: message.clone(),
            room_id: fx.room.clone(),
        });
        assert_eq!(drain(&mut fx.alice_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut fx.bob_rx), vec![expected]);

        let history = fx
            .store
            .list_messages(&fx.room, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(history, vec![message]);
    }

    #[tokio::test]
    async fn content_rules_are_enforced() {
        let mut fx = fixture().await;

        let too_long = SendMessage::text(&fx.room, "x".repeat(11));
        assert_eq!(
            fx.pipeline.send(&fx.alice, too_long).await,
            Err(RealtimeError::ContentTooLarge { limit: 10 })
        );
        // Ten multi-byte characters are still within the limit.
        let accents = SendMessage::text(&fx.room, "é".repeat(10));
        assert!(fx.pipeline.send(&fx.alice, accents).await.is_ok());

        let blank = SendMessage::text(&fx.room, "   ");
        assert_eq!(fx.pipeline.send(&fx.alice, blank).await.unwrap_err().code(), "invalid_payload");

        let mut system = SendMessage::text(&fx.room, "sys");
        system.kind = MessageKind::System;
        assert_eq!(fx.pipeline.send(&fx.alice, system).await.unwrap_err().code(), "invalid_payload");

        let attachment = Attachment {
            url: "https://x/a".into(),
            name: "a".into(),
            mime_type: None,
            size: None,
        };
        let mut crowded = SendMessage::text(&fx.room, "files");
        crowded.attachments = vec![attachment.clone(), attachment];
        assert_eq!(fx.pipeline.send(&fx.alice, crowded).await.unwrap_err().code(), "invalid_payload");

        drain(&mut fx.bob_rx);
        let history = fx.store.list_messages(&fx.room, HistoryQuery::default()).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn outsiders_cannot_send() {
        let mut fx = fixture().await;
        let outsider = fx.store.create_user(&CreateUserRequest::named("eve")).await.unwrap();

        let err = fx
            .pipeline
            .send(&Identity::from(outsider), SendMessage::text(&fx.room, "hi"))
            .await
            .unwrap_err();
        assert_eq!(err, RealtimeError::not_a_member(&fx.room));
        assert!(drain(&mut fx.bob_rx).is_empty());
    }

    #[tokio::test]
    async fn persist_failure_broadcasts_nothing() {
        let mut fx = fixture().await;
        // Warm the membership cache so only the write fails.
        fx.pipeline
            .membership
            .is_member(&fx.alice.id, &fx.room)
            .await
            .unwrap();
        fx.store.set_fail_writes(true);

        assert_eq!(
            fx.pipeline.send(&fx.alice, SendMessage::text(&fx.room, "hi")).await,
            Err(RealtimeError::PersistFailure)
        );
        assert!(drain(&mut fx.alice_rx).is_empty());
        assert!(drain(&mut fx.bob_rx).is_empty());
    }

    #[tokio::test]
    async fn reply_must_target_same_room() {
        let fx = fixture().await;
        let original = fx
            .pipeline
            .send(&fx.alice, SendMessage::text(&fx.room, "first"))
            .await
            .unwrap();

        let mut reply = SendMessage::text(&fx.room, "second");
        reply.reply_to = Some(original.id.clone());
        let saved = fx.pipeline.send(&fx.bob, reply).await.unwrap();
        assert_eq!(saved.reply_to, Some(original.id));

        let mut dangling = SendMessage::text(&fx.room, "third");
        dangling.reply_to = Some("missing".into());
        assert_eq!(
            fx.pipeline.send(&fx.bob, dangling).await.unwrap_err().code(),
            "invalid_payload"
        );
    }

    #[tokio::test]
    async fn mark_read_upserts_and_skips_reader_connection() {
        let mut fx = fixture().await;
        let message = fx
            .pipeline
            .send(&fx.bob, SendMessage::text(&fx.room, "read me"))
            .await
            .unwrap();
        drain(&mut fx.alice_rx);
        drain(&mut fx.bob_rx);

        assert!(fx.pipeline.mark_read(&fx.alice_conn, &message.id, &fx.room).await);
        assert!(fx.pipeline.mark_read(&fx.alice_conn, &message.id, &fx.room).await);

        let stored = fx.store.find_message(&message.id).await.unwrap().unwrap();
        assert_eq!(stored.read_by.len(), 1);
        assert_eq!(stored.read_by[0].user_id, fx.alice.id);

        assert!(drain(&mut fx.alice_rx).is_empty());
        let read = ServerEvent::MessageRead(MessageRead {
            message_id: message.id.clone(),
            user_id: fx.alice.id.clone(),
            room_id: fx.room.clone(),
        });
        assert_eq!(drain(&mut fx.bob_rx), vec![read.clone(), read]);
    }

    #[tokio::test]
    async fn mark_read_failures_are_swallowed() {
        let mut fx = fixture().await;
        let message = fx
            .pipeline
            .send(&fx.bob, SendMessage::text(&fx.room, "read me"))
            .await
            .unwrap();
        drain(&mut fx.bob_rx);

        assert!(!fx.pipeline.mark_read(&fx.alice_conn, "missing", &fx.room).await);
        assert!(!fx.pipeline.mark_read(&fx.alice_conn, &message.id, "other-room").await);

        fx.store.set_fail_writes(true);
        assert!(!fx.pipeline.mark_read(&fx.alice_conn, &message.id, &fx.room).await);
        assert!(drain(&mut fx.bob_rx).is_empty());
    }

    #[tokio::test]
    async fn delete_is_sender_only_and_announced() {
        let mut fx = fixture().await;
        let message = fx
            .pipeline
            .send(&fx.alice, SendMessage::text(&fx.room, "oops"))
            .await
            .unwrap();
        drain(&mut fx.bob_rx);

        assert_eq!(
            fx.pipeline.delete(&fx.bob, &message.id).await,
            Err(RealtimeError::NotFound("message".into()))
        );

        let deleted = fx.pipeline.delete(&fx.alice, &message.id).await.unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.seq, message.seq);
        assert_eq!(
            drain(&mut fx.bob_rx),
            vec![ServerEvent::MessageDeleted(MessageDeleted {
                message_id: message.id,
                room_id: fx.room.clone(),
            })]
        );
    }
}
