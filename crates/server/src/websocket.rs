//! WebSocket handling

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use roverlink_protocol::{ClientMessage, ServerMessage};

use crate::coordinator::CoordinatorEvent;
use crate::state::AppState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound queue drained by the forwarder task; pongs bypass the
    // coordinator entirely.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(100);
    let (pong_tx, mut pong_rx) = mpsc::channel::<Bytes>(8);

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    match serde_json::to_string(&msg) {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                debug!(
                                    component = "websocket",
                                    event = "ws.send.disconnected",
                                    connection_id = conn_id,
                                    "WebSocket send failed, client disconnected"
                                );
                                break;
                            }
                        }
                        Err(e) => {
                            error!(
                                component = "websocket",
                                event = "ws.send.serialize_failed",
                                connection_id = conn_id,
                                error = %e,
                                "Failed to serialize server message"
                            );
                        }
                    }
                }
                data = pong_rx.recv() => {
                    let Some(data) = data else { break };
                    if ws_tx.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    state
        .coordinator()
        .send(CoordinatorEvent::Connected {
            conn_id,
            outbound: outbound_tx.clone(),
        })
        .await;

    // Read loop: per-connection submission order is preserved into the
    // coordinator queue.
    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = pong_tx.send(data).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(msg) => {
                state
                    .coordinator()
                    .send(CoordinatorEvent::Inbound { conn_id, msg })
                    .await;
            }
            Err(e) => {
                // Malformed payload: dropped here, never relayed to peers.
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = text.len(),
                    payload_preview = %truncate_for_log(&text, 240),
                    "Failed to parse client message"
                );
                let _ = outbound_tx
                    .send(ServerMessage::Error {
                        code: "parse_error".into(),
                        message: e.to_string(),
                    })
                    .await;
            }
        }
    }

    state
        .coordinator()
        .send(CoordinatorEvent::Disconnected { conn_id })
        .await;

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        "WebSocket connection closed"
    );
    send_task.abort();
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
