//! # roomcast gateway
//!
//! HTTP surface of the coordinator:
//!
//! - `GET /ws`: the live connection, authenticated by `?token=` or a bearer header
//! - `GET /rooms/:room_id/messages`: membership-checked history for catch-up
//! - `DELETE /messages/:message_id`: delete one of your own messages
//! - `GET /health`

pub mod error;
pub mod health;
pub mod middleware;
pub mod rooms;
pub mod state;
pub mod websocket;

pub use error::{GatewayError, GatewayResult};
pub use state::GatewayState;

use std::sync::Arc;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower::ServiceBuilder;

/// Create the main application router with all routes
pub fn create_router(state: GatewayState) -> Router {
    let state = Arc::new(state);

    let authenticated = rooms::routes().route_layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ws", get(websocket::websocket_handler))
        .merge(authenticated)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::create_trace_middleware())
                .layer(middleware::create_cors_middleware())
                .layer(axum_middleware::from_fn(middleware::logging_middleware)),
        )
}
