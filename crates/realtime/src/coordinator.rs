//! The coordinator facade tying the components together.

use std::sync::Arc;
use std::time::Duration;

use roomcast_config::RealtimeConfig;
use roomcast_database::{ChatStore, HistoryQuery, Message};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, Delivery};
use crate::error::{RealtimeError, RealtimeResult};
use crate::events::{Ready, RoomPresence, ServerEvent};
use crate::identity::{Identity, IdentityVerifier};
use crate::membership::MembershipCache;
use crate::pipeline::{MessageLimits, MessagePipeline};
use crate::presence::PresenceBroadcaster;
use crate::registry::ConnectionRegistry;
use crate::router::{Recipients, RoomRouter};
use crate::session::Session;
use crate::typing::TypingCoordinator;

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn ChatStore>,
    pub(crate) verifier: Arc<dyn IdentityVerifier>,
    pub(crate) config: RealtimeConfig,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) membership: Arc<MembershipCache>,
    pub(crate) router: Arc<RoomRouter>,
    pub(crate) typing: Arc<TypingCoordinator>,
    pub(crate) pipeline: MessagePipeline,
    pub(crate) presence: PresenceBroadcaster,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the shared coordinator state.
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn ChatStore>,
        verifier: Arc<dyn IdentityVerifier>,
        config: RealtimeConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let membership = Arc::new(MembershipCache::new(
            store.clone(),
            Duration::from_secs(config.membership_cache_ttl_seconds),
        ));
        let router = Arc::new(RoomRouter::new(membership.clone()));
        let typing = Arc::new(TypingCoordinator::new(
            router.clone(),
            Duration::from_millis(config.typing_ttl_ms),
        ));
        let pipeline = MessagePipeline::new(
            store.clone(),
            membership.clone(),
            router.clone(),
            MessageLimits::from(&config),
        );
        let presence = PresenceBroadcaster::new(
            store.clone(),
            membership.clone(),
            router.clone(),
            registry.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                store,
                verifier,
                config,
                registry,
                membership,
                router,
                typing,
                pipeline,
                presence,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Verify a handshake credential. Touches no coordinator state.
    pub async fn authenticate(&self, token: Option<&str>) -> RealtimeResult<Identity> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(RealtimeError::Unauthenticated)?;
        self.inner.verifier.verify(token).await
    }

    /// Register a connection for `identity` and subscribe it to the user's rooms.
    ///
    /// The returned receiver is the connection's outbound queue; dropping it
    /// marks the connection closed. The first event queued is `ready`; it is
    /// queued before the connection joins any room's fan-out or the registry.
    pub async fn open(&self, identity: Identity) -> (Session, mpsc::Receiver<Arc<ServerEvent>>) {
        let (connection, receiver) = Connection::new(identity, self.inner.config.outbound_buffer);
        let rooms = match self.inner.membership.rooms_of(connection.user_id()).await {
            Ok(rooms) => rooms.to_vec(),
            Err(err) => {
                warn!(user_id = %connection.user_id(), error = %err, "could not load rooms on connect");
                Vec::new()
            }
        };

        let subscribed = self
            .inner
            .router
            .subscribe_all(&connection, &rooms, |accepted| {
                connection.send(ServerEvent::Ready(Ready {
                    user_id: connection.user_id().to_string(),
                    rooms: accepted.to_vec(),
                }));
            })
            .await;
        let first = self.inner.registry.register(connection.clone()).await;
        info!(
            user_id = %connection.user_id(),
            connection_id = %connection.id(),
            rooms = subscribed.len(),
            "connection opened"
        );

        if first {
            self.inner.presence.announce_online(connection.identity()).await;
        }

        (Session::new(self.clone(), connection), receiver)
    }

    /// [`authenticate`](Self::authenticate) followed by [`open`](Self::open).
    pub async fn connect(
        &self,
        token: Option<&str>,
    ) -> RealtimeResult<(Session, mpsc::Receiver<Arc<ServerEvent>>)> {
        let identity = self.authenticate(token).await?;
        Ok(self.open(identity).await)
    }

    /// Deliver directly to every live connection of a user.
    pub async fn send_to_user(&self, user_id: &str, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        self.inner
            .registry
            .find(user_id)
            .await
            .iter()
            .filter(|connection| {
                connection.deliver(event.clone()) == Delivery::Delivered
            })
            .count()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.registry.is_online(user_id).await
    }

    /// Members of `room_id` with at least one live connection, sorted by id.
    pub async fn online_members(&self, room_id: &str) -> RealtimeResult<Vec<String>> {
        let members = self.inner.membership.members_of(room_id).await?;
        let mut online = Vec::new();
        for user_id in members.keys() {
            if self.inner.registry.is_online(user_id).await {
                online.push(user_id.clone());
            }
        }
        online.sort();
        Ok(online)
    }

    /// Hook for administrative membership writes.
    pub async fn membership_changed(&self, room_id: &str) {
        self.inner.membership.invalidate(room_id).await;
    }

    /// Hook for a member being removed from a room: drops their live
    /// subscriptions and typing state and tells the room.
    pub async fn member_removed(&self, room_id: &str, user_id: &str) {
        self.inner.membership.invalidate(room_id).await;
        let removed = self.inner.router.unsubscribe_user(user_id, room_id).await;
        self.inner.typing.stop(room_id, user_id).await;

        let user = match removed.first() {
            Some(connection) => Some(connection.identity().summary()),
            None => match self.inner.store.find_user(user_id).await {
                Ok(user) => user.map(|user| user.summary()),
                Err(err) => {
                    error!(user_id, error = %err, "failed to load removed member");
                    None
                }
            },
        };

        if let Some(user) = user {
            self.inner
                .router
                .publish(
                    room_id,
                    ServerEvent::UserLeftRoom(RoomPresence {
                        user_id: user_id.to_string(),
                        user,
                        room_id: room_id.to_string(),
                    }),
                    Recipients::All,
                )
                .await;
        }
        info!(room_id, user_id, connections = removed.len(), "member removed");
    }

    /// Logically delete one of `identity`'s messages and announce it.
    pub async fn delete_message(&self, identity: &Identity, message_id: &str) -> RealtimeResult<Message> {
        self.inner.pipeline.delete(identity, message_id).await
    }

    /// Membership-checked history page, the recovery path for missed events.
    pub async fn history(
        &self,
        identity: &Identity,
        room_id: &str,
        query: HistoryQuery,
    ) -> RealtimeResult<Vec<Message>> {
        let room = self
            .inner
            .store
            .find_room_by_membership(&identity.id, room_id)
            .await
            .map_err(|err| {
                error!(room_id, user_id = %identity.id, error = %err, "membership lookup failed");
                RealtimeError::MembershipUnavailable
            })?;
        if room.is_none() {
            return Err(RealtimeError::not_a_member(room_id));
        }

        self.inner
            .store
            .list_messages(room_id, query)
            .await
            .map_err(|err| {
                error!(room_id, error = %err, "failed to load history");
                RealtimeError::StorageUnavailable
            })
    }

    /// Start the typing expiry sweeper. Calling it again is a no-op.
    pub async fn start_background_tasks(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        let interval = Duration::from_millis(self.inner.config.typing_sweep_interval_ms);
        tasks.push(self.inner.typing.spawn_sweeper(interval));
        debug!(?interval, "typing sweeper started");
    }

    pub async fn shutdown(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("coordinator stopped");
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.connection_count().await
    }

    pub async fn is_typing(&self, room_id: &str, user_id: &str) -> bool {
        self.inner.typing.is_typing(room_id, user_id).await
    }
}
