//! Event publisher: websocket fan-out of server events.
//!
//! Connected clients are tracked in an explicit registry (for logs and
//! diagnostics); delivery itself goes through the broadcast channel and is
//! not gated on the registry.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use parking_lot::RwLock;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{models::WsServerEvent, AppState};

/// Registry of connected websocket clients.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<HashSet<Uuid>>>,
}

impl SubscriberRegistry {
    pub fn add(&self, id: Uuid) -> usize {
        let mut set = self.inner.write();
        set.insert(id);
        set.len()
    }

    pub fn remove(&self, id: Uuid) -> usize {
        let mut set = self.inner.write();
        set.remove(&id);
        set.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let connected = state.subscribers.add(client_id);
    info!("🔌 Client connected: {} (total: {})", client_id, connected);

    let mut rx = state.events.subscribe();

    // Greet with the current server time so clients can sync immediately.
    let hello = WsServerEvent::server_time(chrono::Utc::now());
    if send_event(&mut socket, &hello).await.is_err() {
        let remaining = state.subscribers.remove(client_id);
        info!("🔌 Client disconnected: {} (total: {})", client_id, remaining);
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // Lagged receivers skip ahead; the stream stays live.
                        debug!("broadcast recv: {}", e);
                    }
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                match msg {
                    Message::Text(text) => {
                        if handle_client_message(&mut socket, &text).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    let remaining = state.subscribers.remove(client_id);
    info!("🔌 Client disconnected: {} (total: {})", client_id, remaining);
}

async fn send_event(socket: &mut WebSocket, event: &WsServerEvent) -> Result<(), axum::Error> {
    let msg = serde_json::to_string(event).unwrap_or_else(|e| {
        warn!("failed to serialize ws event: {}", e);
        "{}".to_string()
    });
    socket.send(Message::Text(msg)).await
}

async fn handle_client_message(
    socket: &mut WebSocket,
    text: &str,
) -> Result<(), axum::Error> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
        match json.get("type").and_then(|t| t.as_str()) {
            Some("ping") => {
                // Echo the timestamp back so clients can measure latency.
                let timestamp = json
                    .get("data")
                    .and_then(|d| d.get("timestamp"))
                    .and_then(|t| t.as_i64())
                    .unwrap_or(0);
                let pong = serde_json::json!({
                    "type": "pong",
                    "data": { "timestamp": timestamp }
                });
                return socket.send(Message::Text(pong.to_string())).await;
            }
            Some("test") => {
                // Diagnostic echo.
                let response = WsServerEvent::TestResponse {
                    message: "Server received your test!".to_string(),
                };
                return send_event(socket, &response).await;
            }
            _ => {}
        }
    } else if text == "ping" {
        // Legacy plain text ping
        return socket.send(Message::Text("pong".to_string())).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_tracks_connections() {
        let registry = SubscriberRegistry::default();
        assert!(registry.is_empty());

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(registry.add(a), 1);
        assert_eq!(registry.add(b), 2);
        // Re-adding the same id is a no-op.
        assert_eq!(registry.add(a), 2);

        assert_eq!(registry.remove(a), 1);
        assert_eq!(registry.remove(a), 1);
        assert_eq!(registry.len(), 1);
    }
}
