//! In-memory transport and a scripted server peer for session tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc as fmpsc;
use futures_util::{SinkExt, StreamExt};
use murmur_client::error::TransportError;
use murmur_client::ws::{Connector, Frame, TransportLink};
use murmur_client::{
    ClientConfig, ConnectionManager, ConnectionState, ConversationSummary, HistoryMessage,
    HistorySource, SessionEvent,
};
use murmur_shared::{
    codec, AckPayload, ApiError, Envelope, Extra, Kind, MessagePayload, Payload,
    PresencePayload, PresenceStatus, TypingPayload,
};
use tokio::sync::{broadcast, mpsc};
use url::Url;

/// Upper bound for any single wait; generous so paused-clock tests can jump
/// across retry and auth deadlines.
pub const WAIT: Duration = Duration::from_secs(120);

/// Connector whose every successful connect hands the server side to the test.
pub struct MockConnector {
    peers: mpsc::UnboundedSender<Peer>,
    failures: AtomicU32,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                peers,
                failures: AtomicU32::new(0),
            }),
            rx,
        )
    }

    /// Refuse the next `n` connects.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<TransportLink, TransportError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Other("connection refused".into()));
        }

        let (client_tx, from_client) = fmpsc::unbounded::<Frame>();
        let (to_client, client_rx) = fmpsc::unbounded::<Frame>();
        let peer = Peer {
            url: url.clone(),
            from_client,
            to_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Other("test harness gone".into()))?;

        Ok(TransportLink {
            sink: Box::pin(client_tx.sink_map_err(|_| TransportError::Closed)),
            stream: Box::pin(client_rx.map(Ok::<Frame, TransportError>)),
        })
    }
}

/// The server end of one mock connection.
pub struct Peer {
    pub url: Url,
    from_client: fmpsc::UnboundedReceiver<Frame>,
    to_client: fmpsc::UnboundedSender<Frame>,
}

impl Peer {
    /// Next envelope from the client, skipping pings.
    pub async fn recv(&mut self) -> Envelope {
        let next = async {
            while let Some(frame) = self.from_client.next().await {
                if let Some(bytes) = frame.data() {
                    return codec::decode(bytes).expect("client sent an invalid envelope");
                }
            }
            panic!("client closed the connection");
        };
        tokio::time::timeout(WAIT, next)
            .await
            .expect("timed out waiting for client frame")
    }

    /// Resolves once the client has closed its side.
    pub async fn closed(&mut self) {
        let drain = async { while self.from_client.next().await.is_some() {} };
        tokio::time::timeout(WAIT, drain)
            .await
            .expect("client did not close");
    }

    pub fn send(&mut self, envelope: Envelope) {
        let text = codec::encode_text(&envelope).expect("encode");
        self.to_client
            .unbounded_send(Frame::Text(text))
            .expect("client stream dropped");
    }

    pub fn send_raw(&mut self, text: &str) {
        self.to_client
            .unbounded_send(Frame::Text(text.to_string()))
            .expect("client stream dropped");
    }

    /// Read the auth envelope and accept it for `user_id`.
    pub async fn accept_auth(&mut self, user_id: &str) -> Envelope {
        let auth = self.recv().await;
        assert_eq!(auth.kind(), Kind::Auth, "first frame must be auth");
        self.send(auth_ack(user_id).replying_to(auth.id.clone()));
        auth
    }

    /// Read a join and acknowledge it.
    pub async fn accept_join(&mut self, participants: &[&str]) -> String {
        let join = self.recv().await;
        assert_eq!(join.kind(), Kind::Join);
        let conversation_id = join.conversation_id.clone().expect("join without conversation");
        self.send(join_ack(&conversation_id, participants).replying_to(join.id));
        conversation_id
    }
}

fn ack(of: Kind) -> AckPayload {
    AckPayload {
        of,
        user_id: None,
        participant_ids: Vec::new(),
        message_id: None,
        extra: Extra::new(),
    }
}

pub fn auth_ack(user_id: &str) -> Envelope {
    let mut payload = ack(Kind::Auth);
    payload.user_id = Some(user_id.to_string());
    Envelope::new(None, Payload::Ack(payload))
}

pub fn join_ack(conversation_id: &str, participants: &[&str]) -> Envelope {
    let mut payload = ack(Kind::Join);
    payload.participant_ids = participants.iter().map(|p| p.to_string()).collect();
    Envelope::new(Some(conversation_id.to_string()), Payload::Ack(payload))
}

pub fn chat(
    conversation_id: &str,
    id: &str,
    sender_id: &str,
    pending_id: Option<&str>,
    content: &str,
) -> Envelope {
    Envelope::new(
        Some(conversation_id.to_string()),
        Payload::Message(MessagePayload {
            id: Some(id.to_string()),
            pending_id: pending_id.map(str::to_string),
            sender_id: Some(sender_id.to_string()),
            content: content.to_string(),
            created_at: Some(chrono::Utc::now()),
            ..MessagePayload::default()
        }),
    )
}

pub fn typing(conversation_id: &str, user_id: &str, typing: bool) -> Envelope {
    Envelope::new(
        Some(conversation_id.to_string()),
        Payload::Typing(TypingPayload {
            user_id: Some(user_id.to_string()),
            typing,
            extra: Extra::new(),
        }),
    )
}

pub fn presence(user_id: &str, status: PresenceStatus) -> Envelope {
    Envelope::new(
        None,
        Payload::Presence(PresencePayload {
            user_id: user_id.to_string(),
            status,
            extra: Extra::new(),
        }),
    )
}

pub fn config() -> ClientConfig {
    let mut config = ClientConfig::new(
        Url::parse("ws://murmur.test/ws/messaging").expect("url"),
        "t0k",
    );
    config.user_id = "u1".into();
    config.sound_enabled = false;
    // Keep heartbeats out of the way unless a test wants them.
    config.heartbeat_interval = Duration::from_secs(3600);
    config
}

/// Wait for the first event matching `pred`, skipping the rest.
pub async fn wait_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let next = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event bus: {e}"),
            }
        }
    };
    tokio::time::timeout(WAIT, next)
        .await
        .expect("timed out waiting for event")
}

pub async fn wait_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut watch = manager.watch_state();
    tokio::time::timeout(WAIT, watch.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    tokio::time::timeout(WAIT, peers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// A manager that is connected, authenticated as `u1` and ready.
pub async fn ready_manager() -> (
    ConnectionManager,
    Peer,
    mpsc::UnboundedReceiver<Peer>,
    broadcast::Receiver<SessionEvent>,
) {
    let (connector, mut peers) = MockConnector::new();
    let manager = ConnectionManager::new(config(), connector);
    let events = manager.subscribe_events();
    manager.connect();

    let mut peer = next_peer(&mut peers).await;
    peer.accept_auth("u1").await;
    wait_state(&manager, ConnectionState::Ready).await;
    (manager, peer, peers, events)
}

/// History service double: serves a fixed message list and records calls.
#[derive(Default)]
pub struct StubHistory {
    pub messages: Vec<HistoryMessage>,
    pub unavailable: bool,
    calls: Mutex<Vec<String>>,
}

impl StubHistory {
    pub fn with_messages(messages: Vec<HistoryMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(call);
        if self.unavailable {
            return Err(ApiError::http(503, "maintenance".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl HistorySource for StubHistory {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        self.record("list_conversations".into())?;
        Ok(Vec::new())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        self.record(format!(
            "list_messages {conversation_id} before={}",
            before.unwrap_or("-")
        ))?;
        let end = before
            .and_then(|id| self.messages.iter().position(|m| m.id == id))
            .unwrap_or(self.messages.len());
        let start = end.saturating_sub(limit);
        Ok(self.messages[start..end].to_vec())
    }

    async fn mark_read(&self, conversation_id: &str, message_ids: &[String]) -> Result<(), ApiError> {
        self.record(format!("mark_read {conversation_id} {}", message_ids.join(",")))
    }

    async fn add_reaction(
        &self,
        conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), ApiError> {
        self.record(format!("add_reaction {conversation_id} {message_id} {emoji}"))
    }
}

pub fn history_message(id: &str, sender_id: &str, content: &str) -> HistoryMessage {
    HistoryMessage {
        id: id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        created_at: chrono::Utc::now(),
        seq: None,
        read_by: Vec::new(),
    }
}
