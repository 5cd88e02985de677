use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use beadwatch_model::{
    ClientMessage, ErrorPayload, ModelError, ServerMessage, SubscribedPayload,
    UnsubscribedPayload,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::infra::{
    app_state::AppState,
    websocket::{Connection, Delivery, messages},
};

/// Error code sent back when a client frame cannot be understood.
pub const INVALID_MESSAGE_CODE: &str = "invalid_message";

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let buffer = state.config.server.connection_buffer.max(1);
    let (tx, mut rx) = mpsc::channel::<Message>(buffer);

    let connection = Arc::new(Connection::new(tx));
    let conn_id = connection.id;
    state.websocket_manager.add_connection(Arc::clone(&connection));
    tracing::info!(conn_id = %conn_id, "client connected");

    // Single writer per socket keeps frames in enqueue order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(frame) => {
                if let Some(decoded) = messages::websocket_to_client(&frame) {
                    handle_client_message(&state, &connection, decoded);
                }
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Clean up on disconnect
    let rooms = state.websocket_manager.on_disconnect(conn_id);
    drop(connection);
    writer.abort();
    tracing::info!(
        conn_id = %conn_id,
        rooms = rooms.len(),
        "client disconnected"
    );
}

fn handle_client_message(
    state: &AppState,
    connection: &Connection,
    decoded: Result<ClientMessage, ModelError>,
) -> Delivery {
    let reply = match decoded {
        Ok(ClientMessage::Subscribe(repo_id)) => {
            let client_count =
                state.websocket_manager.join(connection.id, &repo_id);
            ServerMessage::Subscribed(SubscribedPayload {
                repo_id,
                client_count,
            })
        }
        Ok(ClientMessage::Unsubscribe(repo_id)) => {
            state.websocket_manager.leave(connection.id, &repo_id);
            ServerMessage::Unsubscribed(UnsubscribedPayload { repo_id })
        }
        Err(err) => {
            tracing::warn!(
                conn_id = %connection.id,
                error = %err,
                "dropping malformed client message"
            );
            ServerMessage::Error(
                ErrorPayload::new(err.to_string()).with_code(INVALID_MESSAGE_CODE),
            )
        }
    };

    let delivery = connection.send_message(&reply);
    match delivery {
        Delivery::Queued => {}
        Delivery::Full => tracing::warn!(
            conn_id = %connection.id,
            event = reply.event_name(),
            "client queue full; dropping reply"
        ),
        Delivery::Closed => tracing::debug!(
            conn_id = %connection.id,
            event = reply.event_name(),
            "client gone before reply"
        ),
    }
    delivery
}

#[cfg(test)]
mod tests {
    use super::*;
    use beadwatch_config::Config;
    use beadwatch_core::StaticRegistry;
    use beadwatch_model::RepoId;

    fn state() -> AppState {
        AppState::new(Config::default(), Arc::new(StaticRegistry::new(Vec::new())))
    }

    #[tokio::test]
    async fn subscribe_ack_reports_a_full_queue() {
        let state = state();
        let (tx, mut rx) = mpsc::channel(1);
        let connection = Connection::new(tx);
        state.websocket_manager.add_connection(Arc::new(connection.clone()));
        let repo = RepoId::from("r1");

        let first = handle_client_message(
            &state,
            &connection,
            Ok(ClientMessage::Subscribe(repo.clone())),
        );
        assert_eq!(first, Delivery::Queued);

        // The queue holds one frame; the second ack has nowhere to go but
        // the subscription itself still lands.
        let second = handle_client_message(
            &state,
            &connection,
            Ok(ClientMessage::Subscribe(repo.clone())),
        );
        assert_eq!(second, Delivery::Full);
        assert_eq!(state.websocket_manager.room_size(&repo), 1);

        assert!(rx.try_recv().is_ok());
        drop(rx);
        let closed = handle_client_message(
            &state,
            &connection,
            Ok(ClientMessage::Unsubscribe(repo.clone())),
        );
        assert_eq!(closed, Delivery::Closed);
        assert_eq!(state.websocket_manager.room_size(&repo), 0);
        state.watcher_pool.shutdown().await;
    }
}
