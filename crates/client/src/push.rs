//! One authenticated push-channel connection.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use bulkpull_types::{ClientMessage, ServerMessage};

use crate::error::ClientError;

#[derive(Debug)]
pub enum PushEvent {
    Message(ServerMessage),
    /// `intentional` is true only for a normal-closure (1000) close frame.
    Closed { intentional: bool },
}

pub struct PushConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    last_frame: Instant,
}

impl PushConnection {
    /// Connect, send the auth frame and wait for `auth_success`.
    /// `timeout` bounds the handshake and the wait for the ack separately.
    pub async fn connect(url: &str, user_id: &str, timeout: Duration) -> Result<Self, ClientError> {
        let (mut stream, _) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| ClientError::Timeout("push handshake"))??;

        let auth = serde_json::to_string(&ClientMessage::Auth {
            user_id: user_id.to_string(),
        })?;
        stream.send(Message::Text(auth.into())).await?;

        tokio::time::timeout(timeout, wait_for_ack(&mut stream))
            .await
            .map_err(|_| ClientError::Timeout("auth_success"))??;

        Ok(Self {
            stream,
            last_frame: Instant::now(),
        })
    }

    /// Next server frame. Any frame, protocol pings included, counts as a
    /// sign of life; silence for `idle` since the last frame is reported as a
    /// missed heartbeat. Cancel-safe: dropping the future loses no frame and
    /// does not restart the idle clock.
    pub async fn next_event(&mut self, idle: Duration) -> Result<PushEvent, ClientError> {
        loop {
            let deadline = self.last_frame + idle;
            let frame = match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Err(_) => return Err(ClientError::HeartbeatMissed(idle)),
                Ok(None) => return Ok(PushEvent::Closed { intentional: false }),
                Ok(Some(frame)) => frame?,
            };
            self.last_frame = Instant::now();

            match frame {
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                    Ok(message) => return Ok(PushEvent::Message(message)),
                    Err(e) => debug!(error = %e, "skipping unrecognised push frame"),
                },
                Message::Close(frame) => {
                    let intentional = frame.is_some_and(|f| f.code == CloseCode::Normal);
                    return Ok(PushEvent::Closed { intentional });
                }
                // tungstenite answers protocol pings itself
                _ => {}
            }
        }
    }

    /// Application-level ping; the server answers with a `pong` frame, which
    /// `next_event` counts as a sign of life.
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        let frame = serde_json::to_string(&ClientMessage::Ping)?;
        self.stream.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "push close failed");
        }
    }
}

async fn wait_for_ack(
    stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Result<(), ClientError> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(text.as_str())? {
                ServerMessage::AuthSuccess => return Ok(()),
                ServerMessage::Error { message } => return Err(ClientError::AuthRejected(message)),
                other => debug!(kind = other.kind(), "frame before auth ack"),
            },
            Message::Close(frame) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(ClientError::AuthRejected(reason));
            }
            _ => {}
        }
    }
    Err(ClientError::ConnectionLost)
}
