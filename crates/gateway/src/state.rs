//! Shared application state for the gateway

use roomcast_database::DatabaseConnection;
use roomcast_realtime::Coordinator;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct GatewayState {
    pub coordinator: Coordinator,
    /// Used by the health probe only; all chat data goes through the coordinator.
    pub database: DatabaseConnection,
}

impl GatewayState {
    pub fn new(coordinator: Coordinator, database: DatabaseConnection) -> Self {
        Self {
            coordinator,
            database,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}
