//! `WebSocket` endpoint speaking the subscriber protocol.
//!
//! Clients connect to `GET /ws`. Each connection becomes one engine
//! subscriber with its own bounded outbound queue:
//!
//! 1. The connection is attached and the engine queues a full snapshot.
//! 2. The client sends `{"type":"ready"}` once it has applied it; only
//!    then does it receive deltas.
//! 3. `{"type":"request_snapshot"}` asks for a fresh snapshot, and
//!    `{"type":"override", command}` applies an operator override whose
//!    outcome is sent back as `override_result`.
//!
//! When the engine drops the subscriber (queue full or closed) its side of
//! the queue closes and the socket is shut down.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use primeval_types::{ClientMessage, ServerMessage, SubscriberId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` subscriber connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_subscribe(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Drive one subscriber connection until either side goes away.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let id = SubscriberId::new();
    let (tx, mut rx) = mpsc::channel(state.subscriber_queue);

    if state.engine.attach(id, tx).await.is_err() {
        warn!(subscriber = %id, "Engine stopped, refusing WebSocket subscriber");
        return;
    }
    info!(subscriber = %id, "WebSocket subscriber attached");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(message) = outbound else {
                    debug!(subscriber = %id, "Engine dropped subscriber");
                    break;
                };
                if !send_message(&mut socket, &message).await {
                    debug!(subscriber = %id, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_text(&mut socket, &state, id, text.as_str()).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(subscriber = %id, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(subscriber = %id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(subscriber = %id, "WebSocket error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    if state.engine.detach(id).await.is_err() {
        debug!(subscriber = %id, "Engine already stopped on detach");
    }
    info!(subscriber = %id, "WebSocket subscriber detached");
}

/// Act on one client text frame. Returns `false` when the connection
/// should close.
async fn handle_client_text(
    socket: &mut WebSocket,
    state: &AppState,
    id: SubscriberId,
    text: &str,
) -> bool {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(subscriber = %id, error = %e, "Ignoring malformed client message");
            return true;
        }
    };

    let result = match message {
        ClientMessage::Ready => state.engine.ready(id).await,
        ClientMessage::RequestSnapshot => state.engine.resync(id).await,
        ClientMessage::Override { command } => match state.engine.apply_override(command).await {
            Ok(outcome) => {
                return send_message(socket, &ServerMessage::OverrideResult(outcome)).await;
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        warn!(subscriber = %id, error = %e, "Engine stopped, closing WebSocket");
        return false;
    }
    true
}

/// Serialize and send one server message. Returns `false` if the socket
/// is gone.
async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize server message: {e}");
            return true;
        }
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}
