use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::web::AppState;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(mut socket: WebSocket, app_state: Arc<AppState>) {
    info!("Heartbeat WebSocket connection established.");
    let mut rx = app_state.heartbeat_broadcaster.subscribe();

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Ok(json_data) => {
                    if socket.send(Message::Text(Utf8Bytes::from(json_data))).await.is_err() {
                        debug!("Error sending heartbeat update, client likely disconnected.");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "WebSocket client lagged behind, heartbeat updates dropped.");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(payload))) => {
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive error.");
                    break;
                }
            },
        }
    }
    info!("Heartbeat WebSocket connection closed.");
}
