//! Per-connection event handling.

use roomcast_database::Message;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::coordinator::Coordinator;
use crate::error::{RealtimeError, RealtimeResult};
use crate::events::{ClientEvent, MessageRef, RoomPresence, RoomRef, SendMessage, ServerEvent};
use crate::identity::Identity;
use crate::registry::Departure;
use crate::router::Recipients;

/// One authenticated connection's view of the coordinator.
///
/// Events from a single session are handled in arrival order. Failures are
/// reported to this connection only.
pub struct Session {
    coordinator: Coordinator,
    connection: Connection,
}

impl Session {
    pub(crate) fn new(coordinator: Coordinator, connection: Connection) -> Self {
        Self {
            coordinator,
            connection,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn identity(&self) -> &Identity {
        self.connection.identity()
    }

    /// Parse and handle one inbound text frame.
    pub async fn handle_text(&self, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.handle(event).await,
            Err(err) => self.report("unknown", &err),
        }
    }

    pub async fn handle(&self, event: ClientEvent) {
        let name = event.name();
        debug!(connection_id = %self.connection.id(), event = name, "client event");

        let result = match event {
            ClientEvent::SendMessage(request) => self.send_message(request).await.map(|_| ()),
            ClientEvent::TypingStart(RoomRef { room_id }) => self.typing_start(&room_id).await,
            ClientEvent::TypingStop(RoomRef { room_id }) => self.typing_stop(&room_id).await,
            ClientEvent::MessageRead(read) => self.message_read(read).await,
            ClientEvent::JoinRoom(RoomRef { room_id }) => self.join_room(&room_id).await,
            ClientEvent::LeaveRoom(RoomRef { room_id }) => self.leave_room(&room_id).await,
        };

        if let Err(err) = result {
            self.report(name, &err);
        }
    }

    pub async fn send_message(&self, request: SendMessage) -> RealtimeResult<Message> {
        self.coordinator
            .inner
            .pipeline
            .send(self.identity(), request)
            .await
    }

    pub async fn join_room(&self, room_id: &str) -> RealtimeResult<()> {
        let inner = &self.coordinator.inner;
        if !inner.router.subscribe(&self.connection, room_id).await? {
            return Ok(());
        }

        inner
            .router
            .publish(
                room_id,
                ServerEvent::UserJoinedRoom(self.room_presence(room_id)),
                Recipients::ExceptConnection(self.connection.id()),
            )
            .await;
        info!(user_id = %self.connection.user_id(), room_id, "joined room");
        Ok(())
    }

    pub async fn leave_room(&self, room_id: &str) -> RealtimeResult<()> {
        let inner = &self.coordinator.inner;
        if !inner.router.unsubscribe(self.connection.id(), room_id).await {
            return Ok(());
        }

        let user_id = self.connection.user_id();
        if !inner.router.has_user_subscription(user_id, room_id).await {
            inner.typing.stop(room_id, user_id).await;
        }

        inner
            .router
            .publish(
                room_id,
                ServerEvent::UserLeftRoom(self.room_presence(room_id)),
                Recipients::All,
            )
            .await;
        info!(user_id = %self.connection.user_id(), room_id, "left room");
        Ok(())
    }

    async fn typing_start(&self, room_id: &str) -> RealtimeResult<()> {
        self.require_subscription(room_id).await?;
        self.coordinator
            .inner
            .typing
            .start(room_id, self.identity())
            .await;
        Ok(())
    }

    async fn typing_stop(&self, room_id: &str) -> RealtimeResult<()> {
        self.require_subscription(room_id).await?;
        self.coordinator
            .inner
            .typing
            .stop(room_id, self.connection.user_id())
            .await;
        Ok(())
    }

    async fn message_read(&self, read: MessageRef) -> RealtimeResult<()> {
        self.require_subscription(&read.room_id).await?;
        self.coordinator
            .inner
            .pipeline
            .mark_read(&self.connection, &read.message_id, &read.room_id)
            .await;
        Ok(())
    }

    /// Tear the connection down: subscriptions first, then the registry
    /// entry. The last connection of a user also clears typing and goes
    /// offline.
    pub async fn disconnect(self) {
        let inner = &self.coordinator.inner;
        let rooms = inner.router.unsubscribe_all(self.connection.id()).await;
        let departure = inner
            .registry
            .unregister(self.connection.user_id(), self.connection.id())
            .await;

        info!(
            user_id = %self.connection.user_id(),
            connection_id = %self.connection.id(),
            rooms = rooms.len(),
            "connection closed"
        );

        if departure == Departure::NowOffline {
            inner.typing.clear_user(self.connection.user_id()).await;
            inner.presence.announce_offline(self.identity()).await;
        }
    }

    async fn require_subscription(&self, room_id: &str) -> RealtimeResult<()> {
        if self
            .coordinator
            .inner
            .router
            .is_subscribed(self.connection.id(), room_id)
            .await
        {
            Ok(())
        } else {
            Err(RealtimeError::not_a_member(room_id))
        }
    }

    fn room_presence(&self, room_id: &str) -> RoomPresence {
        RoomPresence {
            user_id: self.connection.user_id().to_string(),
            user: self.identity().summary(),
            room_id: room_id.to_string(),
        }
    }

    fn report(&self, event: &str, err: &RealtimeError) {
        warn!(
            connection_id = %self.connection.id(),
            user_id = %self.connection.user_id(),
            event,
            code = err.code(),
            error = %err,
            "client event rejected"
        );
        self.connection.send(ServerEvent::from(err));
    }
}
