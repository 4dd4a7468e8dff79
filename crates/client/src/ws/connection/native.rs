//! WebSocket transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::error::TransportError;
use crate::ws::transport::{Connector, Frame, TransportLink};

/// Connects to the messaging endpoint over `ws://` or `wss://`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    /// Upper bound for the TCP + TLS + upgrade handshake.
    pub connect_timeout: Option<std::time::Duration>,
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping(bytes) => Message::Ping(bytes.into()),
        Frame::Pong(bytes) => Message::Pong(bytes.into()),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Ping(bytes) => Some(Frame::Ping(bytes.to_vec())),
        Message::Pong(bytes) => Some(Frame::Pong(bytes.to_vec())),
        Message::Close(_) => Some(Frame::Close),
        // Raw frames only show up when writing, never when reading.
        Message::Frame(_) => None,
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<TransportLink, TransportError> {
        tracing::debug!(host = url.host_str().unwrap_or_default(), "opening websocket");

        let handshake = connect_async(url.as_str());
        let (ws_stream, _response) = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| TransportError::Timeout(limit))??,
            None => handshake.await?,
        };

        let (write, read) = ws_stream.split();

        // Pongs for inbound pings are queued by tungstenite itself and flushed
        // with the next write.
        let sink = write
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(to_message(frame))));

        let stream = read.filter_map(|result| {
            future::ready(match result {
                Ok(message) => from_message(message).map(Ok),
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
