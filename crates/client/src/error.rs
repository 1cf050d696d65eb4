use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("push authentication rejected: {0}")]
    AuthRejected(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("no frame from server for {0:?}")]
    HeartbeatMissed(Duration),

    #[error("push connection lost")]
    ConnectionLost,

    #[error("invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// Errors a poll loop should ride out rather than surface.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::NotFound(_) | ClientError::Decode(_) => false,
            ClientError::Status { status, .. } => *status >= 500,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_terminal() {
        assert!(!ClientError::NotFound("job_1".into()).is_transient());
        assert!(ClientError::ConnectionLost.is_transient());
    }

    #[test]
    fn test_status_split_on_5xx() {
        let server = ClientError::Status { status: 503, message: String::new() };
        let caller = ClientError::Status { status: 401, message: String::new() };
        assert!(server.is_transient());
        assert!(!caller.is_transient());
    }
}
