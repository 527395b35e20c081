use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::connection_manager::ClientChannel;
use crate::server::AppState;

use super::message::ServerMessage;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(client_id = ?query.client_id)
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let client_id = match query.client_id.filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => {
            tracing::warn!("WebSocket connection attempt without clientId");
            return (StatusCode::BAD_REQUEST, "Missing clientId").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state),
    fields(client_id = %client_id)
)]
async fn handle_socket(socket: WebSocket, state: AppState, client_id: String) {
    let connection_start = std::time::Instant::now();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.settings.websocket.channel_buffer.max(1));

    let channel = state.delivery.on_connect(&client_id, tx);
    let connection_id = channel.id;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for writing queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for reading frames from the socket
    let state_clone = state.clone();
    let channel_clone = channel.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &channel_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    let mut shutdown = state.shutdown.subscribe();
    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = shutdown.recv() => {
            tracing::debug!(connection_id = %connection_id, "Closing connection for shutdown");
        }
    }
    send_task.abort();
    recv_task.abort();

    state.delivery.on_connection_closed(&client_id, connection_id);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, channel: &Arc<ClientChannel>) -> bool {
    match msg {
        Message::Text(text) => {
            if let Some(reply) = state
                .delivery
                .on_inbound_message(&channel.client_id, text.as_str())
                .await
            {
                if let Err(e) = channel.try_send(reply) {
                    tracing::warn!(connection_id = %channel.id, error = %e, "Dropping reply, outbound queue unavailable");
                }
            }
            true
        }
        Message::Binary(_) => {
            tracing::debug!(connection_id = %channel.id, "Ignoring binary frame");
            true
        }
        // Axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %channel.id, "Received close frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::*;
    use crate::config::Settings;
    use crate::fallback::{FallbackError, FallbackMessage, FallbackPublisher};

    struct NullPublisher;

    #[async_trait]
    impl FallbackPublisher for NullPublisher {
        fn backend(&self) -> &'static str {
            "null"
        }

        async fn publish(&self, _message: &FallbackMessage) -> Result<(), FallbackError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_outbound_queue_does_not_stall_inbound() {
        let (shutdown, _) = broadcast::channel(1);
        let (state, _handle) =
            AppState::new(Settings::default(), Arc::new(NullPublisher), shutdown.clone());

        let (tx, mut rx) = mpsc::channel(1);
        let channel = state.delivery.on_connect("c1", tx);
        channel.try_send(ServerMessage::pong()).unwrap();

        // Reply to the ping cannot be queued; the frame is dropped, not awaited
        let ping = Message::Text(r#"{"type":"ping"}"#.into());
        let keep_open = tokio::time::timeout(
            Duration::from_secs(1),
            process_message(ping, &state, &channel),
        )
        .await
        .expect("ping handling blocked on a full queue");
        assert!(keep_open);

        let ack = Message::Text(r#"{"type":"ack","messageId":"m1"}"#.into());
        let keep_open = tokio::time::timeout(
            Duration::from_secs(1),
            process_message(ack, &state, &channel),
        )
        .await
        .expect("ack intake blocked on a full queue");
        assert!(keep_open);

        assert_eq!(rx.recv().await, Some(ServerMessage::pong()));
        assert!(rx.try_recv().is_err());
    }
}
