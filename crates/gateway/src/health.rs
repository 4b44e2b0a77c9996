use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::state::GatewayState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub connections: usize,
    pub timestamp: String,
}

pub async fn health_check(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    let database = state.database.test_connection().await.is_ok();
    Json(HealthResponse {
        status: "ok",
        database,
        connections: state.coordinator.connection_count().await,
        timestamp: Utc::now().to_rfc3339(),
    })
}
