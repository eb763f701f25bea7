//! WebSocket connection handling.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::{ClientMessage, ConnectionManager, ServerMessage};
use crate::engine::SyncEngine;

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager and sends the current status
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    engine: SyncEngine,
    conn_manager: Arc<ConnectionManager>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(tx);
    conn_manager.send_to(
        &conn_id,
        ServerMessage::Status {
            status: engine.current_status(),
        },
    );

    // Forward messages from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(response) = process_message(&text, &engine).await {
                    conn_manager.send_to(&conn_id, response);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message. Status changes reach the client through the
/// relay, so only direct answers are returned here.
async fn process_message(text: &str, engine: &SyncEngine) -> Option<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(ServerMessage::error(format!("Invalid message format: {}", e)));
        }
    };

    match client_msg {
        ClientMessage::Ping => Some(ServerMessage::Pong),
        ClientMessage::Sync => match engine.manual_sync().await {
            Ok(_) => None,
            Err(e) => Some(ServerMessage::error(e.to_string())),
        },
        ClientMessage::ToggleOffline => match engine.toggle_manual_offline().await {
            Ok(result) => Some(ServerMessage::ManualOffline {
                enabled: result.manual_offline,
            }),
            Err(e) => Some(ServerMessage::error(e.to_string())),
        },
    }
}
