//! Durable online/offline transitions and their announcement.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use roomcast_database::{ChatStore, PresenceUpdate};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::events::{Presence, ServerEvent};
use crate::identity::Identity;
use crate::membership::MembershipCache;
use crate::registry::ConnectionRegistry;
use crate::router::{Recipients, RoomRouter};

/// Announces presence to connections sharing at least one room with the user.
///
/// Transitions are serialized per user and checked against the registry, so a
/// user is announced online and offline alternately even when connects and
/// disconnects race. Users never wait on each other's storage writes.
pub struct PresenceBroadcaster {
    store: Arc<dyn ChatStore>,
    membership: Arc<MembershipCache>,
    router: Arc<RoomRouter>,
    registry: Arc<ConnectionRegistry>,
    online: Mutex<HashMap<String, Arc<Mutex<bool>>>>,
}

impl PresenceBroadcaster {
    pub fn new(
        store: Arc<dyn ChatStore>,
        membership: Arc<MembershipCache>,
        router: Arc<RoomRouter>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            store,
            membership,
            router,
            registry,
            online: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether the transition was announced.
    pub async fn announce_online(&self, identity: &Identity) -> bool {
        let slot = self.slot(&identity.id).await;
        let mut online = slot.lock().await;
        if *online || !self.registry.is_online(&identity.id).await {
            return false;
        }
        *online = true;

        if let Err(err) = self
            .store
            .update_user_presence(&identity.id, PresenceUpdate::online())
            .await
        {
            error!(user_id = %identity.id, error = %err, "failed to persist online presence");
        }

        let event = ServerEvent::UserOnline(Presence {
            user_id: identity.id.clone(),
            user: Some(identity.summary()),
        });
        self.publish(&identity.id, event).await;
        info!(user_id = %identity.id, "user online");
        true
    }

    /// Returns whether the transition was announced.
    pub async fn announce_offline(&self, identity: &Identity) -> bool {
        let slot = self.slot(&identity.id).await;
        let mut online = slot.lock().await;
        if !*online || self.registry.is_online(&identity.id).await {
            return false;
        }
        *online = false;

        if let Err(err) = self
            .store
            .update_user_presence(&identity.id, PresenceUpdate::offline(Utc::now()))
            .await
        {
            error!(user_id = %identity.id, error = %err, "failed to persist offline presence");
        }

        let event = ServerEvent::UserOffline(Presence {
            user_id: identity.id.clone(),
            user: Some(identity.summary()),
        });
        self.publish(&identity.id, event).await;
        info!(user_id = %identity.id, "user offline");
        true
    }

    async fn slot(&self, user_id: &str) -> Arc<Mutex<bool>> {
        self.online
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    async fn publish(&self, user_id: &str, event: ServerEvent) {
        let rooms = match self.membership.rooms_of(user_id).await {
            Ok(rooms) => rooms,
            Err(err) => {
                warn!(user_id, error = %err, "skipping presence announcement");
                return;
            }
        };
        self.router
            .publish_to_rooms(&rooms, event, Recipients::ExceptUser(user_id))
            .await;
    }
}
