//! Authenticated HTTP endpoints backed by the coordinator.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get},
    Extension, Json, Router,
};
use roomcast_database::{HistoryQuery, Message};
use roomcast_realtime::Identity;
use serde::Deserialize;

use crate::error::GatewayResult;
use crate::state::GatewayState;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u32>,
    /// Only messages with a lower sequence number.
    pub before: Option<i64>,
}

impl HistoryParams {
    fn query(&self) -> HistoryQuery {
        let query = self.limit.map(HistoryQuery::latest).unwrap_or_default();
        match self.before {
            Some(seq) => query.before(seq),
            None => query,
        }
    }
}

pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/rooms/:room_id/messages", get(room_history))
        .route("/messages/:message_id", delete(delete_message))
}

/// One page of a room's history, oldest first.
pub async fn room_history(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> GatewayResult<Json<Vec<Message>>> {
    let messages = state
        .coordinator
        .history(&identity, &room_id, params.query())
        .await?;
    Ok(Json(messages))
}

pub async fn delete_message(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<String>,
) -> GatewayResult<Json<Message>> {
    let message = state
        .coordinator
        .delete_message(&identity, &message_id)
        .await?;
    Ok(Json(message))
}
