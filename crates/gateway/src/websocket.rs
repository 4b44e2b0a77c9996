//! The `/ws` endpoint bridging a socket to a coordinator session.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use roomcast_realtime::{Coordinator, Identity};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::GatewayResult;
use crate::middleware::bearer_token;
use crate::state::GatewayState;

#[derive(Debug, Default, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// Authenticate, then upgrade. A rejected handshake never touches
/// coordinator state.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<WebSocketQuery>,
    headers: HeaderMap,
) -> GatewayResult<Response> {
    let token = query
        .token
        .or_else(|| bearer_token(&headers).map(str::to_owned));
    let identity = state.coordinator.authenticate(token.as_deref()).await?;

    let coordinator = state.coordinator.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, coordinator, identity)))
}

async fn handle_socket(socket: WebSocket, coordinator: Coordinator, identity: Identity) {
    let (session, mut outbound) = coordinator.open(identity).await;
    let (mut sender, mut receiver) = socket.split();
    let connection_id = session.connection().id();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, event = event.name(), "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let read_loop = async {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => session.handle_text(&text).await,
                Ok(Message::Binary(bytes)) => {
                    session.handle_text(&String::from_utf8_lossy(&bytes)).await
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!(%connection_id, error = %err, "socket read failed");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = &mut send_task => debug!(%connection_id, "writer finished"),
        _ = read_loop => debug!(%connection_id, "reader finished"),
    }

    send_task.abort();
    session.disconnect().await;
}
