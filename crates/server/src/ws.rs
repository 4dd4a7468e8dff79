//! WebSocket handler for real-time messaging.
//!
//! A connection starts unauthenticated: the first frame must be an `auth`
//! envelope, sent within the configured deadline. After the `auth` ack the
//! connection can join rooms, post messages and relay room events.

use std::collections::HashSet;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use murmur_shared::{
    codec, codes, AckPayload, DecodeError, Envelope, Extra, Kind, MessagePayload, Payload,
    PresenceStatus,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RoomError;
use crate::state::{AppState, Outbound};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.token, state))
}

async fn handle_socket(socket: WebSocket, query_token: Option<String>, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Envelope>(state.config.queue_capacity);

    // Task to forward queued envelopes to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match codec::encode_text(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(kind = %envelope.kind(), "failed to encode envelope: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let (user_id, auth_id) = match authenticate(&mut receiver, query_token.as_deref(), &state).await
    {
        Ok(accepted) => accepted,
        Err(reply) => {
            if let Some(reply) = reply {
                let _ = tx.try_send(reply);
            }
            // Dropping the queue lets the writer flush the error and close.
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    let out = Outbound::new(user_id.clone(), tx);
    tracing::info!(connection = %out.id, %user_id, "websocket authenticated");
    out.push(auth_ack(&user_id).replying_to(auth_id));

    let mut conn = Connection {
        state,
        out,
        joined: HashSet::new(),
    };
    conn.open().await;

    // Main receive loop
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => conn.on_frame(text.as_str().as_bytes()).await,
            Ok(Message::Binary(bytes)) => conn.on_frame(&bytes).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection = %conn.out.id, "websocket error: {}", e);
                break;
            }
        }
    }

    conn.close().await;
    send_task.abort();
}

/// Wait for the `auth` envelope and verify it.
///
/// `Err(Some(reply))` carries the error to send before closing; `Err(None)`
/// means the peer went away first.
async fn authenticate(
    receiver: &mut SplitStream<WebSocket>,
    query_token: Option<&str>,
    state: &AppState,
) -> Result<(String, String), Option<Envelope>> {
    let first_frame = async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(text.as_str().as_bytes().to_vec()),
                Ok(Message::Binary(bytes)) => return Some(bytes.to_vec()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    };

    let bytes = match tokio::time::timeout(state.config.auth_timeout, first_frame).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Err(None),
        Err(_) => {
            tracing::debug!("no auth envelope before deadline");
            return Err(Some(Envelope::error(
                codes::AUTH_REQUIRED,
                "authentication timed out",
                Some(Kind::Auth),
            )));
        }
    };

    let envelope = codec::decode(&bytes).map_err(|e| Some(invalid_envelope(&e)))?;
    let Payload::Auth(auth) = &envelope.payload else {
        return Err(Some(
            Envelope::error(
                codes::AUTH_REQUIRED,
                "first envelope must be auth",
                Some(envelope.kind()),
            )
            .replying_to(envelope.id),
        ));
    };

    let token = match auth.token.as_str() {
        "" => query_token.unwrap_or_default(),
        token => token,
    };
    match state.verifier.verify(token).await {
        Some(user_id) => Ok((user_id, envelope.id)),
        None => {
            tracing::warn!("websocket auth failed");
            Err(Some(
                Envelope::error(codes::AUTH_FAILED, "invalid token", Some(Kind::Auth))
                    .replying_to(envelope.id),
            ))
        }
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

fn auth_ack(user_id: &str) -> Envelope {
    let mut payload = ack(Kind::Auth);
    payload.user_id = Some(user_id.to_string());
    Envelope::new(None, Payload::Ack(payload))
}

/// Decode failures reported back to the client under one code.
fn invalid_envelope(error: &DecodeError) -> Envelope {
    let mut reply = error.to_envelope();
    if let Payload::Error(payload) = &mut reply.payload {
        payload.code = codes::INVALID_ENVELOPE.to_string();
    }
    reply
}

/// One authenticated connection.
struct Connection {
    state: AppState,
    out: Outbound,
    joined: HashSet<String>,
}

impl Connection {
    fn user_id(&self) -> &str {
        &self.out.user_id
    }

    async fn open(&mut self) {
        let presence = &self.state.presence;
        for (user_id, status) in presence.snapshot(self.user_id()).await {
            self.out.push(Envelope::presence(user_id, status));
        }
        if presence.connect(&self.out).await {
            presence
                .broadcast(self.user_id(), PresenceStatus::Online)
                .await;
        }
    }

    async fn close(&mut self) {
        for conversation_id in self.joined.drain() {
            self.state.rooms.leave(&conversation_id, self.out.id).await;
        }
        let presence = &self.state.presence;
        if presence.disconnect(&self.out).await {
            presence
                .broadcast(self.user_id(), PresenceStatus::Offline)
                .await;
        }
        tracing::info!(connection = %self.out.id, user_id = %self.user_id(), "websocket closed");
    }

    fn reply_error(&self, request: &Envelope, code: &str, message: impl Into<String>) {
        let mut reply = Envelope::error(code, message, Some(request.kind()))
            .replying_to(request.id.clone());
        reply.conversation_id = request.conversation_id.clone();
        self.out.push(reply);
    }

    fn reply_room_error(&self, request: &Envelope, error: RoomError) {
        let code = match error {
            RoomError::NotJoined(_) => codes::NOT_JOINED,
            RoomError::Rejected { .. } => codes::JOIN_REJECTED,
        };
        self.reply_error(request, code, error.to_string());
    }

    async fn on_frame(&mut self, bytes: &[u8]) {
        let envelope = match codec::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(connection = %self.out.id, "rejecting frame: {}", e);
                self.out.push(invalid_envelope(&e));
                return;
            }
        };
        tracing::trace!(connection = %self.out.id, kind = %envelope.kind(), "inbound");

        // Room kinds are guaranteed a conversation id by the codec.
        let conversation_id = envelope.conversation_id.clone().unwrap_or_default();
        match &envelope.payload {
            Payload::Join(_) => self.join(&envelope, conversation_id).await,
            Payload::Leave(_) => {
                if self.joined.remove(&conversation_id) {
                    self.state.rooms.leave(&conversation_id, self.out.id).await;
                }
                let reply = Envelope::ack(Some(conversation_id), Kind::Leave)
                    .replying_to(envelope.id.clone());
                self.out.push(reply);
            }
            Payload::Message(message) => {
                self.post(&envelope, conversation_id, message.clone()).await
            }
            Payload::Typing(typing) => {
                let mut typing = typing.clone();
                typing.user_id = Some(self.user_id().to_string());
                self.relay(&envelope, conversation_id, Payload::Typing(typing))
                    .await;
            }
            Payload::Read(read) => {
                let mut read = read.clone();
                read.reader_id = Some(self.user_id().to_string());
                self.relay(&envelope, conversation_id, Payload::Read(read))
                    .await;
            }
            Payload::Reaction(reaction) => {
                let mut reaction = reaction.clone();
                reaction.user_id = Some(self.user_id().to_string());
                self.relay(&envelope, conversation_id, Payload::Reaction(reaction))
                    .await;
            }
            Payload::Presence(presence) => {
                self.state
                    .presence
                    .broadcast(self.user_id(), presence.status)
                    .await;
            }
            Payload::Auth(_) => {
                self.reply_error(&envelope, codes::INVALID_ENVELOPE, "already authenticated")
            }
            Payload::Ack(_) | Payload::Error(_) => {
                tracing::trace!(kind = %envelope.kind(), "ignoring server-only envelope");
            }
        }
    }

    async fn join(&mut self, request: &Envelope, conversation_id: String) {
        match self.state.rooms.join(&conversation_id, &self.out).await {
            Ok(participant_ids) => {
                tracing::debug!(user_id = %self.user_id(), %conversation_id, "joined");
                self.joined.insert(conversation_id.clone());
                let mut payload = ack(Kind::Join);
                payload.participant_ids = participant_ids;
                let reply = Envelope::new(Some(conversation_id), Payload::Ack(payload))
                    .replying_to(request.id.clone());
                self.out.push(reply);
            }
            Err(e) => self.reply_room_error(request, e),
        }
    }

    async fn post(&mut self, request: &Envelope, conversation_id: String, message: MessagePayload) {
        if message.content.trim().is_empty() {
            self.reply_error(request, codes::INVALID_ENVELOPE, "empty message");
            return;
        }

        let message_id = Uuid::new_v4().to_string();
        let sender_id = self.user_id().to_string();
        let published = self
            .state
            .rooms
            .publish(&conversation_id, self.out.id, |seq| {
                let echo = MessagePayload {
                    id: Some(message_id.clone()),
                    pending_id: message.pending_id,
                    sender_id: Some(sender_id),
                    content: message.content,
                    created_at: Some(chrono::Utc::now()),
                    seq: Some(seq),
                    extra: message.extra,
                };
                let mut envelope =
                    Envelope::new(Some(conversation_id.clone()), Payload::Message(echo));
                envelope.origin_timestamp = request.origin_timestamp;
                envelope
            })
            .await;

        match published {
            Ok(_) => {
                let mut payload = ack(Kind::Message);
                payload.message_id = Some(message_id);
                let reply = Envelope::new(Some(conversation_id), Payload::Ack(payload))
                    .replying_to(request.id.clone());
                self.out.push(reply);
            }
            Err(e) => self.reply_room_error(request, e),
        }
    }

    async fn relay(&mut self, request: &Envelope, conversation_id: String, payload: Payload) {
        let mut envelope = Envelope::new(Some(conversation_id.clone()), payload);
        envelope.origin_timestamp = request.origin_timestamp;
        if let Err(e) = self
            .state
            .rooms
            .relay(&conversation_id, self.out.id, &envelope)
            .await
        {
            self.reply_room_error(request, e);
        }
    }
}
