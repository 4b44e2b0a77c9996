//! Room subscriptions and fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId, Delivery};
use crate::error::{RealtimeError, RealtimeResult};
use crate::events::ServerEvent;
use crate::membership::MembershipCache;

/// Which subscribers of a room receive a published event.
#[derive(Debug, Clone, Copy)]
pub enum Recipients<'a> {
    All,
    ExceptConnection(ConnectionId),
    ExceptUser(&'a str),
}

impl Recipients<'_> {
    fn includes(&self, connection: &Connection) -> bool {
        match self {
            Recipients::All => true,
            Recipients::ExceptConnection(id) => connection.id() != *id,
            Recipients::ExceptUser(user_id) => connection.user_id() != *user_id,
        }
    }
}

#[derive(Default)]
struct SubscriptionGraph {
    rooms: HashMap<String, HashMap<ConnectionId, Connection>>,
    connections: HashMap<ConnectionId, HashSet<String>>,
}

impl SubscriptionGraph {
    fn remove(&mut self, connection_id: ConnectionId, room_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(subscribers) => {
                let removed = subscribers.remove(&connection_id).is_some();
                if subscribers.is_empty() {
                    self.rooms.remove(room_id);
                }
                removed
            }
            None => false,
        };

        if let Some(rooms) = self.connections.get_mut(&connection_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                self.connections.remove(&connection_id);
            }
        }
        removed
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct RoomRouter {
    membership: Arc<MembershipCache>,
    graph: RwLock<SubscriptionGraph>,
}

impl RoomRouter {
    pub fn new(membership: Arc<MembershipCache>) -> Self {
        Self {
            membership,
            graph: RwLock::new(SubscriptionGraph::default()),
        }
    }

    /// Subscribe after checking durable membership. Returns `true` when the
    /// subscription is new.
    pub async fn subscribe(&self, connection: &Connection, room_id: &str) -> RealtimeResult<bool> {
        if !self.membership.is_member(connection.user_id(), room_id).await? {
            return Err(RealtimeError::not_a_member(room_id));
        }

        let mut graph = self.graph.write().await;
        let added = graph
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection.id(), connection.clone())
            .is_none();
        graph
            .connections
            .entry(connection.id())
            .or_default()
            .insert(room_id.to_string());

        if added {
            debug!(room_id, connection_id = %connection.id(), user_id = %connection.user_id(), "subscribed");
        }
        Ok(added)
    }

    /// Subscribe to every room in `room_ids` the connection's user belongs to.
    ///
    /// `before` sees the accepted rooms and runs under the graph lock ahead of
    /// the inserts, so nothing published to those rooms can reach the
    /// connection before it.
    pub async fn subscribe_all(
        &self,
        connection: &Connection,
        room_ids: &[String],
        before: impl FnOnce(&[String]),
    ) -> Vec<String> {
        let mut accepted = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            match self.membership.is_member(connection.user_id(), room_id).await {
                Ok(true) => accepted.push(room_id.clone()),
                Ok(false) => debug!(room_id = %room_id, user_id = %connection.user_id(), "no longer a member"),
                Err(err) => warn!(room_id = %room_id, error = %err, "auto-subscribe failed"),
            }
        }

        let mut graph = self.graph.write().await;
        before(&accepted);
        for room_id in &accepted {
            graph
                .rooms
                .entry(room_id.clone())
                .or_default()
                .insert(connection.id(), connection.clone());
        }
        if !accepted.is_empty() {
            graph
                .connections
                .entry(connection.id())
                .or_default()
                .extend(accepted.iter().cloned());
        }
        accepted
    }

    /// Idempotent. Returns whether a subscription existed.
    pub async fn unsubscribe(&self, connection_id: ConnectionId, room_id: &str) -> bool {
        let removed = self.graph.write().await.remove(connection_id, room_id);
        if removed {
            debug!(room_id, %connection_id, "unsubscribed");
        }
        removed
    }

    /// Drop every subscription of a connection, returning the rooms it left.
    pub async fn unsubscribe_all(&self, connection_id: ConnectionId) -> Vec<String> {
        let mut graph = self.graph.write().await;
        let rooms: Vec<String> = graph
            .connections
            .remove(&connection_id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();

        for room_id in &rooms {
            if let Some(subscribers) = graph.rooms.get_mut(room_id) {
                subscribers.remove(&connection_id);
                if subscribers.is_empty() {
                    graph.rooms.remove(room_id);
                }
            }
        }
        rooms
    }

    /// Unsubscribe every connection of `user_id` from `room_id`.
    pub async fn unsubscribe_user(&self, user_id: &str, room_id: &str) -> Vec<Connection> {
        let mut graph = self.graph.write().await;
        let leaving: Vec<Connection> = graph
            .rooms
            .get(room_id)
            .map(|subscribers| {
                subscribers
                    .values()
                    .filter(|connection| connection.user_id() == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for connection in &leaving {
            graph.remove(connection.id(), room_id);
        }
        leaving
    }

    pub async fn is_subscribed(&self, connection_id: ConnectionId, room_id: &str) -> bool {
        let graph = self.graph.read().await;
        graph
            .connections
            .get(&connection_id)
            .is_some_and(|rooms| rooms.contains(room_id))
    }

    /// Whether any connection of `user_id` is still subscribed to `room_id`.
    pub async fn has_user_subscription(&self, user_id: &str, room_id: &str) -> bool {
        let graph = self.graph.read().await;
        graph.rooms.get(room_id).is_some_and(|subscribers| {
            subscribers
                .values()
                .any(|connection| connection.user_id() == user_id)
        })
    }

    pub async fn subscriptions(&self, connection_id: ConnectionId) -> HashSet<String> {
        let graph = self.graph.read().await;
        graph.connections.get(&connection_id).cloned().unwrap_or_default()
    }

    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        let graph = self.graph.read().await;
        graph.rooms.get(room_id).map_or(0, HashMap::len)
    }

    /// Deliver `event` once to every connection subscribed to `room_id` at call
    /// time. Never waits on a recipient; full or closed queues are skipped.
    pub async fn publish(
        &self,
        room_id: &str,
        event: ServerEvent,
        recipients: Recipients<'_>,
    ) -> FanOut {
        let event = Arc::new(event);
        let graph = self.graph.read().await;
        let Some(subscribers) = graph.rooms.get(room_id) else {
            return FanOut::default();
        };

        let fan_out = deliver_all(
            subscribers
                .values()
                .filter(|connection| recipients.includes(connection)),
            &event,
        );
        debug!(
            room_id,
            event = event.name(),
            delivered = fan_out.delivered,
            dropped = fan_out.dropped,
            "published"
        );
        fan_out
    }

    /// Publish to the union of several rooms' subscribers, once per connection.
    pub async fn publish_to_rooms(
        &self,
        room_ids: &[String],
        event: ServerEvent,
        recipients: Recipients<'_>,
    ) -> FanOut {
        let event = Arc::new(event);
        let graph = self.graph.read().await;

        let mut seen = HashSet::new();
        let targets = room_ids
            .iter()
            .filter_map(|room_id| graph.rooms.get(room_id))
            .flat_map(|subscribers| subscribers.values())
            .filter(|connection| recipients.includes(connection))
            .filter(|connection| seen.insert(connection.id()));

        let fan_out = deliver_all(targets, &event);
        debug!(
            rooms = room_ids.len(),
            event = event.name(),
            delivered = fan_out.delivered,
            "published to rooms"
        );
        fan_out
    }
}

fn deliver_all<'a>(
    connections: impl Iterator<Item = &'a Connection>,
    event: &Arc<ServerEvent>,
) -> FanOut {
    let mut fan_out = FanOut::default();
    for connection in connections {
        match connection.deliver(event.clone()) {
            Delivery::Delivered => fan_out.delivered += 1,
            Delivery::Dropped => fan_out.dropped += 1,
            Delivery::Gone => {}
        }
    }
    fan_out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{drain, identity};
    use crate::events::{MessageDeleted, ServerEvent};
    use roomcast_database::{ChatStore, MemberRole, MemoryStore};
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        router: RoomRouter,
        room: String,
    }

    async fn fixture(users: &[&str]) -> (Fixture, Vec<String>) {
        let store = Arc::new(MemoryStore::new());
        let mut ids = Vec::new();
        for name in users {
            let user = store
                .create_user(&roomcast_database::CreateUserRequest::named(*name))
                .await
                .unwrap();
            ids.push(user.id);
        }
        let room = store
            .create_room(&roomcast_database::CreateRoomRequest::public("r", &ids[0]))
            .await
            .unwrap();
        for id in &ids[1..] {
            store.add_member(&room.id, id, MemberRole::Member).await.unwrap();
        }
        let dyn_store: Arc<dyn ChatStore> = store.clone();
        let membership = Arc::new(MembershipCache::new(dyn_store, Duration::from_secs(60)));
        (
            Fixture {
                store,
                router: RoomRouter::new(membership),
                room: room.id,
            },
            ids,
        )
    }

    fn event(n: usize) -> ServerEvent {
        ServerEvent::MessageDeleted(MessageDeleted {
            message_id: format!("m{n}"),
            room_id: "r".into(),
        })
    }

    #[tokio::test]
    async fn publish_reaches_exactly_the_subscribers() {
        let (fx, ids) = fixture(&["alice", "bob", "carol"]).await;
        let (alice, mut alice_rx) = Connection::new(identity(&ids[0]), 8);
        let (bob, mut bob_rx) = Connection::new(identity(&ids[1]), 8);
        let (_carol, mut carol_rx) = Connection::new(identity(&ids[2]), 8);

        assert!(fx.router.subscribe(&alice, &fx.room).await.unwrap());
        assert!(fx.router.subscribe(&bob, &fx.room).await.unwrap());

        let fan_out = fx.router.publish(&fx.room, event(1), Recipients::All).await;
        assert_eq!(fan_out.delivered, 2);
        assert_eq!(drain(&mut alice_rx), vec![event(1)]);
        assert_eq!(drain(&mut bob_rx), vec![event(1)]);
        assert!(drain(&mut carol_rx).is_empty());
    }

    #[tokio::test]
    async fn non_members_cannot_subscribe() {
        let (fx, _ids) = fixture(&["alice"]).await;
        let (outsider, _rx) = Connection::new(identity("outsider"), 8);

        let err = fx.router.subscribe(&outsider, &fx.room).await.unwrap_err();
        assert_eq!(err, RealtimeError::not_a_member(&fx.room));
        assert_eq!(fx.router.subscriber_count(&fx.room).await, 0);
    }

    #[tokio::test]
    async fn membership_outage_denies_subscription() {
        let (fx, ids) = fixture(&["alice"]).await;
        let (alice, _rx) = Connection::new(identity(&ids[0]), 8);

        fx.store.set_fail_reads(true);
        assert_eq!(
            fx.router.subscribe(&alice, &fx.room).await,
            Err(RealtimeError::MembershipUnavailable)
        );
        assert!(!fx.router.is_subscribed(alice.id(), &fx.room).await);
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_are_idempotent() {
        let (fx, ids) = fixture(&["alice"]).await;
        let (alice, _rx) = Connection::new(identity(&ids[0]), 8);

        assert!(fx.router.subscribe(&alice, &fx.room).await.unwrap());
        assert!(!fx.router.subscribe(&alice, &fx.room).await.unwrap());
        assert_eq!(fx.router.subscriber_count(&fx.room).await, 1);

        assert!(fx.router.unsubscribe(alice.id(), &fx.room).await);
        assert!(!fx.router.unsubscribe(alice.id(), &fx.room).await);
        assert!(fx.router.subscriptions(alice.id()).await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_all_leaves_no_entries() {
        let (fx, ids) = fixture(&["alice"]).await;
        let second = fx
            .store
            .create_room(&roomcast_database::CreateRoomRequest::public("r2", &ids[0]))
            .await
            .unwrap();
        let (alice, _rx) = Connection::new(identity(&ids[0]), 8);
        fx.router.subscribe(&alice, &fx.room).await.unwrap();
        fx.router.subscribe(&alice, &second.id).await.unwrap();

        let mut left = fx.router.unsubscribe_all(alice.id()).await;
        left.sort();
        let mut expected = vec![fx.room.clone(), second.id.clone()];
        expected.sort();
        assert_eq!(left, expected);
        assert_eq!(fx.router.subscriber_count(&fx.room).await, 0);
        assert_eq!(fx.router.subscriber_count(&second.id).await, 0);
        assert!(fx.router.unsubscribe_all(alice.id()).await.is_empty());
    }

    #[tokio::test]
    async fn exclusions_filter_recipients() {
        let (fx, ids) = fixture(&["alice", "bob"]).await;
        let (phone, mut phone_rx) = Connection::new(identity(&ids[0]), 8);
        let (laptop, mut laptop_rx) = Connection::new(identity(&ids[0]), 8);
        let (bob, mut bob_rx) = Connection::new(identity(&ids[1]), 8);
        for conn in [&phone, &laptop, &bob] {
            fx.router.subscribe(conn, &fx.room).await.unwrap();
        }

        fx.router
            .publish(&fx.room, event(1), Recipients::ExceptConnection(phone.id()))
            .await;
        fx.router
            .publish(&fx.room, event(2), Recipients::ExceptUser(&ids[0]))
            .await;

        assert!(drain(&mut phone_rx).is_empty());
        assert_eq!(drain(&mut laptop_rx), vec![event(1)]);
        assert_eq!(drain(&mut bob_rx), vec![event(1), event(2)]);
    }

    #[tokio::test]
    async fn slow_or_closed_recipients_do_not_affect_others() {
        let (fx, ids) = fixture(&["alice", "bob", "carol"]).await;
        let (slow, mut slow_rx) = Connection::new(identity(&ids[0]), 1);
        let (gone, gone_rx) = Connection::new(identity(&ids[1]), 8);
        let (healthy, mut healthy_rx) = Connection::new(identity(&ids[2]), 8);
        for conn in [&slow, &gone, &healthy] {
            fx.router.subscribe(conn, &fx.room).await.unwrap();
        }
        drop(gone_rx);

        let first = fx.router.publish(&fx.room, event(1), Recipients::All).await;
        let second = fx.router.publish(&fx.room, event(2), Recipients::All).await;

        assert_eq!(first, FanOut { delivered: 2, dropped: 0 });
        assert_eq!(second, FanOut { delivered: 1, dropped: 1 });
        assert_eq!(drain(&mut slow_rx), vec![event(1)]);
        assert_eq!(drain(&mut healthy_rx), vec![event(1), event(2)]);
    }

    #[tokio::test]
    async fn per_room_order_is_preserved() {
        let (fx, ids) = fixture(&["alice"]).await;
        let (alice, mut rx) = Connection::new(identity(&ids[0]), 64);
        fx.router.subscribe(&alice, &fx.room).await.unwrap();

        for n in 0..20 {
            fx.router.publish(&fx.room, event(n), Recipients::All).await;
        }
        assert_eq!(drain(&mut rx), (0..20).map(event).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn multi_room_publish_delivers_once_per_connection() {
        let (fx, ids) = fixture(&["alice", "bob"]).await;
        let second = fx
            .store
            .create_room(&roomcast_database::CreateRoomRequest::public("r2", &ids[0]))
            .await
            .unwrap();
        fx.store
            .add_member(&second.id, &ids[1], MemberRole::Member)
            .await
            .unwrap();

        let (bob, mut bob_rx) = Connection::new(identity(&ids[1]), 8);
        fx.router.subscribe(&bob, &fx.room).await.unwrap();
        fx.router.subscribe(&bob, &second.id).await.unwrap();

        let rooms = vec![fx.room.clone(), second.id.clone()];
        let fan_out = fx
            .router
            .publish_to_rooms(&rooms, event(7), Recipients::ExceptUser(&ids[0]))
            .await;
        assert_eq!(fan_out.delivered, 1);
        assert_eq!(drain(&mut bob_rx), vec![event(7)]);
    }

    #[tokio::test]
    async fn unsubscribe_user_removes_all_devices() {
        let (fx, ids) = fixture(&["alice", "bob"]).await;
        let (phone, _p) = Connection::new(identity(&ids[1]), 8);
        let (laptop, _l) = Connection::new(identity(&ids[1]), 8);
        let (alice, _a) = Connection::new(identity(&ids[0]), 8);
        for conn in [&phone, &laptop, &alice] {
            fx.router.subscribe(conn, &fx.room).await.unwrap();
        }

        let removed = fx.router.unsubscribe_user(&ids[1], &fx.room).await;
        assert_eq!(removed.len(), 2);
        assert_eq!(fx.router.subscriber_count(&fx.room).await, 1);
        assert!(fx.router.is_subscribed(alice.id(), &fx.room).await);
    }

    #[tokio::test]
    async fn subscribe_all_skips_foreign_rooms_and_holds_publishers_off() {
        let (fx, ids) = fixture(&["alice", "bob"]).await;
        let foreign = fx
            .store
            .create_room(&roomcast_database::CreateRoomRequest::public("private", &ids[0]))
            .await
            .unwrap();
        let (bob, _rx) = Connection::new(identity(&ids[1]), 8);

        let mut seen = Vec::new();
        let rooms = vec![fx.room.clone(), foreign.id.clone()];
        let accepted = fx
            .router
            .subscribe_all(&bob, &rooms, |accepted| {
                assert!(fx.router.graph.try_read().is_err(), "publishers must wait");
                seen = accepted.to_vec();
            })
            .await;

        assert_eq!(accepted, vec![fx.room.clone()]);
        assert_eq!(seen, accepted);
        assert!(fx.router.is_subscribed(bob.id(), &fx.room).await);
        assert!(!fx.router.is_subscribed(bob.id(), &foreign.id).await);
    }

    #[tokio::test]
    async fn user_subscription_tracks_remaining_devices() {
        let (fx, ids) = fixture(&["alice", "bob"]).await;
        let (phone, _p) = Connection::new(identity(&ids[1]), 8);
        let (laptop, _l) = Connection::new(identity(&ids[1]), 8);
        fx.router.subscribe(&phone, &fx.room).await.unwrap();
        fx.router.subscribe(&laptop, &fx.room).await.unwrap();

        fx.router.unsubscribe(phone.id(), &fx.room).await;
        assert!(fx.router.has_user_subscription(&ids[1], &fx.room).await);
        fx.router.unsubscribe(laptop.id(), &fx.room).await;
        assert!(!fx.router.has_user_subscription(&ids[1], &fx.room).await);
        assert!(!fx.router.has_user_subscription(&ids[0], &fx.room).await);
    }
}
