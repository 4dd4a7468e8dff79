//! Spawns a server on an ephemeral port and drives it with raw WebSocket clients.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use murmur_server::auth::StaticTokens;
use murmur_server::{app, AppState, ServerConfig};
use murmur_shared::{codec, Envelope, Kind, Payload};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
}

impl TestServer {
    pub fn url(&self, token: &str) -> String {
        format!("ws://{}/ws/messaging?token={}", self.addr, token)
    }
}

/// Tokens `t-alice`, `t-bob` and `t-carol` authenticate the matching users.
pub async fn spawn_server(auth_timeout: Duration) -> TestServer {
    let verifier = StaticTokens::default()
        .with("t-alice", "alice")
        .with("t-bob", "bob")
        .with("t-carol", "carol");
    let config = ServerConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        auth_timeout,
        ..ServerConfig::default()
    };
    let state = AppState::new(config, Arc::new(verifier));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    TestServer { addr }
}

pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(server: &TestServer, token: &str) -> Self {
        let (socket, _) = tokio_tungstenite::connect_async(server.url(token))
            .await
            .expect("websocket handshake");
        Self { socket }
    }

    /// Connect and complete the auth handshake.
    pub async fn login(server: &TestServer, token: &str) -> Self {
        let mut client = Self::connect(server, token).await;
        let auth = Envelope::auth(token);
        client.send(&auth).await;
        let ack = client.recv_kind(Kind::Ack).await;
        assert_eq!(ack.correlation_id.as_deref(), Some(auth.id.as_str()));
        client
    }

    pub async fn send(&mut self, envelope: &Envelope) {
        let text = codec::encode_text(envelope).unwrap();
        self.socket.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.socket
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    /// Next envelope, or `None` once the server has closed the socket.
    pub async fn next(&mut self) -> Option<Envelope> {
        let next = async {
            while let Some(msg) = self.socket.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        return Some(codec::decode(text.as_str().as_bytes()).unwrap())
                    }
                    Ok(Message::Close(_)) | Err(_) => return None,
                    Ok(_) => {}
                }
            }
            None
        };
        tokio::time::timeout(WAIT, next)
            .await
            .expect("timed out waiting for server frame")
    }

    pub async fn recv(&mut self) -> Envelope {
        self.next().await.expect("server closed the connection")
    }

    /// Skip envelopes until one of `kind` arrives.
    pub async fn recv_kind(&mut self, kind: Kind) -> Envelope {
        loop {
            let envelope = self.recv().await;
            if envelope.kind() == kind {
                return envelope;
            }
        }
    }

    /// Skip presence traffic and return the next room envelope.
    pub async fn recv_room(&mut self) -> Envelope {
        loop {
            let envelope = self.recv().await;
            if envelope.kind() != Kind::Presence {
                return envelope;
            }
        }
    }

    /// Join and wait for the ack; returns the participant ids.
    pub async fn join(&mut self, conversation_id: &str) -> Vec<String> {
        let join = Envelope::join(conversation_id);
        self.send(&join).await;
        let ack = self.recv_room().await;
        assert_eq!(ack.correlation_id.as_deref(), Some(join.id.as_str()));
        match ack.payload {
            Payload::Ack(ack) => {
                assert_eq!(ack.of, Kind::Join);
                ack.participant_ids
            }
            other => panic!("expected join ack, got {other:?}"),
        }
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}
