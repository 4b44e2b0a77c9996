//! Who is connected right now.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::connection::{Connection, ConnectionId};

/// Result of removing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// That was the user's last connection.
    NowOffline,
    StillOnline { remaining: usize },
    /// The connection was not registered (already removed).
    Unknown,
}

/// Live connections keyed by user id; a user may hold several at once.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: RwLock<HashMap<String, HashMap<ConnectionId, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when this is the user's first live connection.
    pub async fn register(&self, connection: Connection) -> bool {
        let mut users = self.users.write().await;
        let connections = users.entry(connection.user_id().to_string()).or_default();
        connections.retain(|_, existing| !existing.is_closed());
        let first = connections.is_empty();

        debug!(
            user_id = %connection.user_id(),
            connection_id = %connection.id(),
            first,
            "registered connection"
        );
        connections.insert(connection.id(), connection);
        first
    }

    /// Remove one connection. Concurrent removals of a user's last connections
    /// report [`Departure::NowOffline`] exactly once.
    pub async fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> Departure {
        let mut users = self.users.write().await;
        let Some(connections) = users.get_mut(user_id) else {
            return Departure::Unknown;
        };
        if connections.remove(&connection_id).is_none() {
            return Departure::Unknown;
        }

        if connections.is_empty() {
            users.remove(user_id);
            debug!(user_id, %connection_id, "last connection closed");
            Departure::NowOffline
        } else {
            Departure::StillOnline {
                remaining: connections.len(),
            }
        }
    }

    /// The user's live connections; closed transports are never returned.
    pub async fn find(&self, user_id: &str) -> Vec<Connection> {
        let users = self.users.read().await;
        users
            .get(user_id)
            .map(|connections| {
                connections
                    .values()
                    .filter(|connection| !connection.is_closed())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        let users = self.users.read().await;
        users.get(user_id).is_some_and(|connections| !connections.is_empty())
    }

    pub async fn online_users(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.users.read().await.values().map(HashMap::len).sum()
    }
}
