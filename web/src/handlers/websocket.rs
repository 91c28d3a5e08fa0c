//! WebSocket endpoint that streams a user's notifications.
//!
//! ```text
//! Client          WebSocket Handler          UserChannels
//!   │                    │                        │
//!   ├─ Connect ─────────>│                        │
//!   │  (X-User-Id)       ├─ register(user) ──────>│
//!   │                    │                        │
//!   │                    │<── send(user, json) ───┤  (notification fan-out)
//!   │<─ Text frame ──────┤                        │
//!   │                    │                        │
//!   ├─ Close ───────────>│                        │
//!   │                    ├─ unregister(user) ────>│
//! ```
//!
//! The channel is push-only: text frames from the client are ignored.

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures::{SinkExt, stream::StreamExt};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{UserChannels, UserIdentity};

/// Router serving `GET /ws/notifications`.
pub fn notifications_router(channels: Arc<UserChannels>) -> Router {
    Router::new()
        .route("/ws/notifications", get(handle))
        .with_state(channels)
}

/// Upgrade the connection and attach it to the caller's channel.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn handle(
    UserIdentity(user): UserIdentity,
    State(channels): State<Arc<UserChannels>>,
    ws: WebSocketUpgrade,
) -> Response {
    info!(user_id = %user, "Notification socket requested");
    ws.on_upgrade(move |socket| handle_socket(socket, channels, user))
}

async fn handle_socket(socket: WebSocket, channels: Arc<UserChannels>, user: Uuid) {
    let connection = channels.register(user);
    let connection_id = connection.id;
    let mut notifications = connection.receiver;

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = notifications.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        debug!("Notification send task terminated");
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
        debug!("Notification receive task terminated");
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    channels.unregister(user, connection_id);
    info!(user_id = %user, connection_id, "Notification socket closed");
}
