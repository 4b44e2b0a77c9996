//! Live connection handles.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

use crate::events::ServerEvent;
use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of handing an event to one connection's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The queue was full; the event was dropped for this connection only.
    Dropped,
    /// The transport side already went away.
    Gone,
}

/// A live, authenticated connection.
///
/// Cloning is cheap; all clones feed the same bounded outbound queue. The
/// transport owns the matching receiver and the connection counts as closed
/// once that receiver is dropped.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    identity: Arc<Identity>,
    outbound: mpsc::Sender<Arc<ServerEvent>>,
}

impl Connection {
    pub fn new(identity: Identity, buffer: usize) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (outbound, receiver) = mpsc::channel(buffer.max(1));
        let connection = Self {
            id: ConnectionId::new(),
            identity: Arc::new(identity),
            outbound,
        };
        (connection, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        &self.identity.id
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Queue `event` without waiting.
    pub fn deliver(&self, event: Arc<ServerEvent>) -> Delivery {
        match self.outbound.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(event)) => {
                warn!(
                    connection_id = %self.id,
                    user_id = %self.identity.id,
                    event = event.name(),
                    "outbound queue full, dropping event"
                );
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    pub fn send(&self, event: ServerEvent) -> Delivery {
        self.deliver(Arc::new(event))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::events::{ErrorPayload, ServerEvent};

    fn ping() -> ServerEvent {
        ServerEvent::Error(ErrorPayload {
            message: "ping".into(),
            code: "test".into(),
        })
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (connection, mut receiver) = Connection::new(identity("u1"), 1);

        assert_eq!(connection.send(ping()), Delivery::Delivered);
        assert_eq!(connection.send(ping()), Delivery::Dropped);
        assert_eq!(drain(&mut receiver).len(), 1);
        assert_eq!(connection.send(ping()), Delivery::Delivered);
    }

    #[test]
    fn dropped_receiver_closes_connection() {
        let (connection, receiver) = connection("u1");
        assert!(!connection.is_closed());

        drop(receiver);
        assert!(connection.is_closed());
        assert_eq!(connection.send(ping()), Delivery::Gone);
    }

    #[test]
    fn ids_are_unique() {
        let (a, _ra) = connection("u1");
        let (b, _rb) = connection("u1");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.user_id(), b.user_id());
    }
}
