//! Transport seam between the session driver and an actual socket.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use url::Url;

use crate::error::TransportError;

/// One transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Envelope bytes carried by this frame, if any.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Frame::Text(text) => Some(text.as_bytes()),
            Frame::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An open, bidirectional connection.
pub struct TransportLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports. Implemented over tokio-tungstenite for real use and over
/// in-memory channels in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<TransportLink, TransportError>;
}
