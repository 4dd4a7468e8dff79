//! Session core: everything a connection knows, with no I/O of its own.
//!
//! The driver in [`super::manager`] owns the socket and the timers and calls
//! into a [`Session`] for every frame, tick and control request. Outbound
//! frames go into an unbounded queue drained by the link's writer task, so
//! anything queued while the session lock is held keeps its order on the wire.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use murmur_shared::{
    codec, codes, AckPayload, DecodeError, Envelope, ErrorPayload, Kind, Payload,
    PresenceStatus,
};
use tokio::sync::{broadcast, mpsc, watch};

use super::connection::{ConnectionMachine, ConnectionState, Effect, Input, ReconnectConfig};
use super::events::SessionEvent;
use super::transport::Frame;
use crate::error::SessionError;
use crate::notify::NotificationFanout;
use crate::registry::SubscriptionRegistry;
use crate::stores::{Action, Change, ConversationStore, DeliveryState};

/// Lock a shared session. The session stays consistent between calls, so a
/// panic elsewhere does not make it unusable.
pub(crate) fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outbound request awaiting an `ack` or `error`, keyed by envelope id.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    Auth,
    Join(String),
    Leave(String),
    Message {
        conversation_id: String,
        pending_id: String,
    },
}

pub struct Session {
    token: String,
    machine: ConnectionMachine,
    registry: SubscriptionRegistry,
    store: ConversationStore,
    fanout: NotificationFanout,
    pending: HashMap<String, PendingOp>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
    /// Our own status, repeated on every heartbeat.
    status: PresenceStatus,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.machine.state())
            .field("joined", &self.registry.joined_ids())
            .field("pending", &self.pending.len())
            .field("attached", &self.outbound.is_some())
            .finish()
    }
}

impl Session {
    pub fn new(
        token: impl Into<String>,
        local_user: impl Into<String>,
        policy: ReconnectConfig,
        fanout: NotificationFanout,
        events: broadcast::Sender<SessionEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        let local_user = local_user.into();
        let mut fanout = fanout;
        fanout.set_local_user(local_user.clone());
        Self {
            token: token.into(),
            machine: ConnectionMachine::new(policy),
            registry: SubscriptionRegistry::new(),
            store: ConversationStore::new(local_user),
            fanout,
            pending: HashMap::new(),
            outbound: None,
            events,
            state,
            status: PresenceStatus::Online,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    pub fn fanout_mut(&mut self) -> &mut NotificationFanout {
        &mut self.fanout
    }

    /// Hand the session the writer queue of a freshly opened link.
    pub fn attach(&mut self, outbound: mpsc::UnboundedSender<Frame>) {
        self.outbound = Some(outbound);
    }

    /// Feed the machine one input. Effects the session can carry out itself
    /// are handled here; the rest (sockets and timers) go back to the driver.
    pub fn input(&mut self, input: Input) -> Vec<Effect> {
        let effects = self.machine.handle(input);
        self.state.send_replace(self.machine.state());

        let mut io = Vec::new();
        for effect in effects {
            match effect {
                Effect::SendAuth => {
                    let envelope = Envelope::auth(self.token.clone());
                    self.pending.insert(envelope.id.clone(), PendingOp::Auth);
                    self.send(envelope);
                }
                Effect::ReplayJoins => self.replay_joins(),
                Effect::Emit(event) => self.publish(event),
                Effect::Close => {
                    self.detach();
                    io.push(Effect::Close);
                }
                other => io.push(other),
            }
        }
        io
    }

    fn detach(&mut self) {
        self.outbound = None;
        self.pending.clear();
        self.registry.unconfirm_all();
        self.store.apply(Action::FailAllPending);
    }

    fn replay_joins(&mut self) {
        for conversation_id in self.registry.joined_ids() {
            self.send_join(&conversation_id);
        }
    }

    fn send_join(&mut self, conversation_id: &str) -> bool {
        let envelope = Envelope::join(conversation_id);
        self.pending
            .insert(envelope.id.clone(), PendingOp::Join(conversation_id.to_string()));
        self.send(envelope)
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is fine; events are fire-and-forget.
        let _ = self.events.send(event);
    }

    fn send(&mut self, envelope: Envelope) -> bool {
        let text = match codec::encode_text(&envelope) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(kind = %envelope.kind(), error = %e, "failed to encode envelope");
                return false;
            }
        };
        self.send_frame(Frame::Text(text))
    }

    fn send_frame(&mut self, frame: Frame) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    fn is_ready(&self) -> bool {
        self.machine.state() == ConnectionState::Ready && self.outbound.is_some()
    }

    /// Ready, and `conversation_id` is one we have joined.
    fn can_post(&self, conversation_id: &str) -> bool {
        self.is_ready() && self.registry.is_joined(conversation_id)
    }

    /// Process one inbound transport frame.
    pub fn on_frame(&mut self, frame: Frame, now: Instant) -> Vec<Effect> {
        let mut io = Vec::new();
        if self.machine.state() == ConnectionState::Degraded {
            io.extend(self.input(Input::TrafficResumed));
        }

        let Some(bytes) = frame.data() else {
            return io;
        };
        let envelope = codec::decode_frame(bytes);
        if let Payload::Error(error) = &envelope.payload {
            if DecodeError::is_local_code(&error.code) {
                tracing::warn!(code = %error.code, message = %error.message, "dropping undecodable frame");
                self.publish(SessionEvent::Error(SessionError::Decode(error.message.clone())));
                return io;
            }
        }

        match self.machine.state() {
            ConnectionState::Authenticating => io.extend(self.on_auth_reply(envelope)),
            ConnectionState::Ready | ConnectionState::Degraded => self.on_envelope(envelope, now),
            state => tracing::trace!(?state, kind = %envelope.kind(), "ignoring frame"),
        }
        io
    }

    fn on_auth_reply(&mut self, envelope: Envelope) -> Vec<Effect> {
        if let Some(id) = envelope.correlation_id.as_deref() {
            self.pending.remove(id);
        }
        match envelope.payload {
            Payload::Ack(AckPayload {
                of: Kind::Auth,
                user_id,
                ..
            }) => {
                if let Some(user_id) = user_id {
                    self.store.set_local_user(user_id.clone());
                    self.fanout.set_local_user(user_id);
                }
                tracing::info!(user_id = %self.store.local_user(), "authenticated");
                self.input(Input::AuthAccepted)
            }
            Payload::Error(ErrorPayload { code, message, .. }) => {
                tracing::warn!(%code, %message, "authentication rejected");
                self.input(Input::AuthRejected(message))
            }
            other => {
                tracing::trace!(kind = %other.kind(), "ignoring envelope before auth ack");
                Vec::new()
            }
        }
    }

    fn on_envelope(&mut self, envelope: Envelope, now: Instant) {
        let op = envelope
            .correlation_id
            .as_deref()
            .and_then(|id| self.pending.remove(id));

        // Room-scoped traffic for conversations we are not in is dropped
        // before it reaches the store or the fan-out.
        let room_scoped = matches!(
            envelope.payload,
            Payload::Message(_) | Payload::Typing(_) | Payload::Read(_) | Payload::Reaction(_)
        );
        if room_scoped {
            let joined = envelope
                .conversation_id
                .as_deref()
                .map_or(false, |id| self.registry.is_joined(id));
            if !joined {
                tracing::debug!(
                    kind = %envelope.kind(),
                    conversation_id = ?envelope.conversation_id,
                    "dropping envelope for unjoined conversation"
                );
                return;
            }
        }

        let conversation_id = envelope.conversation_id.clone().unwrap_or_default();
        match &envelope.payload {
            Payload::Message(message) => {
                self.store.apply(Action::Inbound {
                    conversation_id,
                    payload: message.clone(),
                    origin_timestamp: envelope.origin_timestamp,
                });
                if let Some(notification) = self.fanout.evaluate(&envelope) {
                    self.fanout.deliver(&notification);
                    self.publish(SessionEvent::Notification(notification));
                }
            }
            Payload::Typing(typing) => {
                let Some(user_id) = typing.user_id.clone() else {
                    return;
                };
                self.store.apply(Action::Typing {
                    conversation_id,
                    user_id,
                    typing: typing.typing,
                    now,
                });
            }
            Payload::Read(read) => {
                self.store.apply(Action::PeerRead {
                    conversation_id,
                    reader_id: read.reader_id.clone().unwrap_or_default(),
                    message_ids: read.message_ids.clone(),
                });
            }
            Payload::Reaction(reaction) => {
                self.store.apply(Action::Reaction {
                    conversation_id,
                    message_id: reaction.message_id.clone(),
                    user_id: reaction.user_id.clone().unwrap_or_default(),
                    emoji: reaction.emoji.clone(),
                    at: envelope.origin_timestamp.unwrap_or_else(Utc::now),
                });
            }
            Payload::Presence(presence) => {
                let changes = self.store.apply(Action::Presence {
                    user_id: presence.user_id.clone(),
                    status: presence.status,
                    now,
                });
                self.publish_presence(changes);
            }
            Payload::Ack(ack) => self.on_ack(ack, op, envelope.conversation_id.as_deref()),
            Payload::Error(error) => self.on_error(error, op, envelope.conversation_id.as_deref()),
            Payload::Auth(_) | Payload::Join(_) | Payload::Leave(_) => {
                tracing::trace!(kind = %envelope.kind(), "ignoring client-only envelope");
                return;
            }
        }

        self.publish(SessionEvent::Envelope(envelope));
    }

    fn on_ack(&mut self, ack: &AckPayload, op: Option<PendingOp>, conversation_id: Option<&str>) {
        match (ack.of, op) {
            (Kind::Join, op) => {
                let id = match op {
                    Some(PendingOp::Join(id)) => Some(id),
                    _ => conversation_id.map(str::to_string),
                };
                let Some(id) = id else { return };
                // A leave may have raced the ack.
                if self.registry.confirm(&id) {
                    self.store.apply(Action::Joined {
                        conversation_id: id,
                        participant_ids: ack.participant_ids.clone(),
                    });
                }
            }
            (Kind::Message, op) => {
                let conversation_id = match op {
                    Some(PendingOp::Message {
                        conversation_id, ..
                    }) => Some(conversation_id),
                    _ => conversation_id.map(str::to_string),
                };
                if let (Some(conversation_id), Some(message_id)) =
                    (conversation_id, ack.message_id.clone())
                {
                    self.store.apply(Action::Delivered {
                        conversation_id,
                        message_id,
                    });
                }
            }
            (of, _) => tracing::trace!(%of, "ack"),
        }
    }

    fn on_error(&mut self, error: &ErrorPayload, op: Option<PendingOp>, conversation_id: Option<&str>) {
        tracing::warn!(code = %error.code, message = %error.message, "server error");
        match op {
            Some(PendingOp::Join(id)) => self.revert_join(&id),
            Some(PendingOp::Message {
                conversation_id,
                pending_id,
            }) => {
                self.store.apply(Action::SendFailed {
                    conversation_id,
                    pending_id,
                });
            }
            Some(PendingOp::Leave(_)) | Some(PendingOp::Auth) => {}
            None => {
                if error.of == Some(Kind::Join) || error.code == codes::JOIN_REJECTED {
                    if let Some(id) = conversation_id {
                        self.revert_join(id);
                    }
                }
            }
        }
        self.publish(SessionEvent::Error(SessionError::Server {
            code: error.code.clone(),
            message: error.message.clone(),
        }));
    }

    fn revert_join(&mut self, conversation_id: &str) {
        if self.registry.revert(conversation_id) {
            self.store.apply(Action::Left {
                conversation_id: conversation_id.to_string(),
            });
        }
    }

    fn publish_presence(&self, changes: Vec<Change>) {
        for change in changes {
            if let Change::PresenceChanged { user_id, status } = change {
                self.publish(SessionEvent::Presence { user_id, status });
            }
        }
    }

    /// Periodic liveness: a transport ping plus the current status for peers.
    pub fn heartbeat(&mut self) -> bool {
        if !matches!(
            self.machine.state(),
            ConnectionState::Ready | ConnectionState::Degraded
        ) {
            return false;
        }
        let presence = Envelope::presence(self.store.local_user(), self.status);
        self.send_frame(Frame::Ping(Vec::new())) && self.send(presence)
    }

    /// Age out typing indicators and presence entries.
    pub fn expire(&mut self, now: Instant) {
        self.store.apply(Action::ExpireTyping { now });
        let changes = self.store.apply(Action::ExpirePresence { now });
        self.publish_presence(changes);
    }

    /// Caller-initiated teardown: close cleanly and forget everything.
    pub fn dispose(&mut self) -> Vec<Effect> {
        let io = self.input(Input::Disconnect);
        self.outbound = None;
        self.pending.clear();
        self.registry.clear();
        self.store.apply(Action::Reset);
        self.fanout.reset();
        io
    }

    // Outbound commands. Each one refuses, without side effects, unless the
    // session is ready. Conversation traffic also needs the conversation joined.

    pub fn join_conversation(&mut self, conversation_id: &str) -> bool {
        if !self.is_ready() {
            return false;
        }
        if !self.registry.join(conversation_id) {
            return true;
        }
        self.send_join(conversation_id)
    }

    pub fn leave_conversation(&mut self, conversation_id: &str) -> bool {
        if !self.is_ready() || !self.registry.leave(conversation_id) {
            return false;
        }
        self.store.apply(Action::Left {
            conversation_id: conversation_id.to_string(),
        });
        let envelope = Envelope::leave(conversation_id);
        self.pending
            .insert(envelope.id.clone(), PendingOp::Leave(conversation_id.to_string()));
        self.send(envelope)
    }

    /// Returns the pending id of the optimistic message.
    pub fn send_chat_message(&mut self, conversation_id: &str, content: &str) -> Option<String> {
        if !self.can_post(conversation_id) {
            return None;
        }
        let pending_id = uuid::Uuid::new_v4().to_string();
        let envelope = Envelope::message(conversation_id, pending_id.clone(), content);
        self.store.apply(Action::LocalSend {
            conversation_id: conversation_id.to_string(),
            pending_id: pending_id.clone(),
            content: content.to_string(),
            origin_timestamp: envelope.origin_timestamp.unwrap_or_else(Utc::now),
        });
        self.track_message(&envelope, conversation_id, &pending_id);
        self.send(envelope);
        Some(pending_id)
    }

    /// Resend a failed message under its original pending id.
    pub fn retry_message(&mut self, conversation_id: &str, pending_id: &str) -> bool {
        if !self.can_post(conversation_id) {
            return false;
        }
        let Some(content) = self
            .store
            .conversation(conversation_id)
            .and_then(|c| c.find_by_pending(pending_id))
            .filter(|m| m.delivery_state == DeliveryState::Failed)
            .map(|m| m.content.clone())
        else {
            return false;
        };
        self.store.apply(Action::Retry {
            conversation_id: conversation_id.to_string(),
            pending_id: pending_id.to_string(),
        });
        let envelope = Envelope::message(conversation_id, pending_id, content);
        self.track_message(&envelope, conversation_id, pending_id);
        self.send(envelope)
    }

    fn track_message(&mut self, envelope: &Envelope, conversation_id: &str, pending_id: &str) {
        self.pending.insert(
            envelope.id.clone(),
            PendingOp::Message {
                conversation_id: conversation_id.to_string(),
                pending_id: pending_id.to_string(),
            },
        );
    }

    pub fn send_typing(&mut self, conversation_id: &str, typing: bool) -> bool {
        self.can_post(conversation_id) && self.send(Envelope::typing(conversation_id, typing))
    }

    pub fn mark_message_read(&mut self, conversation_id: &str, message_ids: Vec<String>) -> bool {
        if !self.can_post(conversation_id) {
            return false;
        }
        self.store.apply(Action::LocalRead {
            conversation_id: conversation_id.to_string(),
            message_ids: message_ids.clone(),
        });
        self.send(Envelope::read(conversation_id, message_ids))
    }

    pub fn add_reaction(&mut self, conversation_id: &str, message_id: &str, emoji: &str) -> bool {
        self.can_post(conversation_id)
            && self.send(Envelope::reaction(conversation_id, message_id, emoji))
    }

    pub fn set_presence(&mut self, status: PresenceStatus) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.status = status;
        let user_id = self.store.local_user().to_string();
        self.send(Envelope::presence(user_id, status))
    }
}
