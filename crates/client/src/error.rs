//! Client-side error types.

use thiserror::Error;

/// Errors raised by a [`Connector`](crate::ws::transport::Connector) or the
/// frame stream it returns. Always retryable.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced to observers through the session event bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("authentication was not acknowledged in time")]
    AuthTimeout,

    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("dropped undecodable frame: {0}")]
    Decode(String),

    #[error("server error {code}: {message}")]
    Server { code: String, message: String },
}

impl SessionError {
    /// Fatal errors need caller intervention (a new token, a manual connect).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::AuthRejected(_)
                | SessionError::AuthTimeout
                | SessionError::RetriesExhausted { .. }
        )
    }
}

/// A notification sink could not show its notification.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}
