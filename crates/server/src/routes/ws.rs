// crates/server/src/routes/ws.rs
//! Push channel.
//!
//! The first frame must be `{"type":"auth","userId":..}` and arrive within
//! the auth timeout, otherwise the server sends an `error` frame and closes
//! with a policy-violation code. After `auth_success` the connection receives
//! every event published for that owner, gets a WebSocket ping each heartbeat
//! interval, and may send `{"type":"ping"}` to get a `pong` frame back.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use bulkpull_types::{normalize_id, ClientMessage, ServerMessage};

use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    let owner_id = match authenticate(&mut stream, state.push.auth_timeout).await {
        Ok(owner_id) => owner_id,
        Err(reason) => {
            warn!(reason, "push connection rejected");
            reject(&mut sink, reason).await;
            return;
        }
    };

    // Subscribe before acknowledging so nothing published after the ack is missed.
    let (conn_id, mut events) = state.notifier.subscribe(&owner_id);
    if send_json(&mut sink, &ServerMessage::AuthSuccess).await.is_err() {
        state.notifier.unsubscribe(&owner_id, conn_id);
        return;
    }
    info!(owner_id = %owner_id, conn_id = %conn_id, "push connection authenticated");

    // Replies to client pings share the socket writer with hub events.
    let (reply_tx, mut reply_rx) = mpsc::channel::<Message>(16);
    let heartbeat = state.push.heartbeat;
    let forward_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
        loop {
            let msg = tokio::select! {
                event = events.recv() => match event {
                    Some(text) => Message::Text(text.into()),
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(msg) => msg,
                    None => break,
                },
                _ = ticker.tick() => Message::Ping(Bytes::new()),
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Ping) => {
                    let Ok(pong) = serde_json::to_string(&ServerMessage::Pong) else {
                        continue;
                    };
                    if reply_tx.send(Message::Text(pong.into())).await.is_err() {
                        break;
                    }
                }
                Ok(ClientMessage::Auth { .. }) => {
                    debug!(conn_id = %conn_id, "ignoring repeated auth frame");
                }
                Err(e) => {
                    debug!(conn_id = %conn_id, error = %e, "ignoring unrecognised frame");
                }
            },
            Message::Close(_) => break,
            // Pong replies to protocol pings are handled by axum
            _ => {}
        }
    }

    // Cleanup
    state.notifier.unsubscribe(&owner_id, conn_id);
    forward_task.abort();
    info!(owner_id = %owner_id, conn_id = %conn_id, "push connection closed");
}

/// Wait for the auth frame. Returns the normalized owner id.
async fn authenticate(
    stream: &mut SplitStream<WebSocket>,
    timeout: Duration,
) -> Result<String, &'static str> {
    let first = match tokio::time::timeout(timeout, stream.next()).await {
        Err(_) => return Err("auth timeout"),
        Ok(None) | Ok(Some(Err(_))) => return Err("connection closed before auth"),
        Ok(Some(Ok(first))) => first,
    };

    let Message::Text(text) = first else {
        return Err("first message must be auth");
    };
    match serde_json::from_str::<ClientMessage>(text.as_str()) {
        Ok(ClientMessage::Auth { user_id }) => {
            let owner_id = normalize_id(&user_id);
            if owner_id.is_empty() {
                Err("userId must not be blank")
            } else {
                Ok(owner_id)
            }
        }
        Ok(_) => Err("first message must be auth"),
        Err(_) => Err("invalid auth format"),
    }
}

async fn reject(sink: &mut SplitSink<WebSocket, Message>, reason: &'static str) {
    let _ = send_json(
        sink,
        &ServerMessage::Error {
            message: reason.to_string(),
        },
    )
    .await;
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}

async fn send_json(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    sink.send(Message::Text(text.into())).await
}
