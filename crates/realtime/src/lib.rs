//! Presence tracking and room fan-out for live chat connections.
//!
//! A [`Coordinator`] owns the shared state. Each transport connection gets a
//! [`Session`] that feeds client events in and a queue of [`ServerEvent`]s
//! to write back out.

pub mod connection;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod identity;
pub mod membership;
pub mod pipeline;
pub mod presence;
pub mod registry;
pub mod router;
pub mod session;
pub mod typing;

pub use connection::{Connection, ConnectionId, Delivery};
pub use coordinator::Coordinator;
pub use error::{RealtimeError, RealtimeResult};
pub use events::{ClientEvent, ServerEvent};
pub use identity::{Identity, IdentityVerifier};
pub use session::Session;
