//! Wire envelope and kind-specific payloads shared by client and server.
//!
//! Every payload type carries an `extra` map so fields added by a newer peer
//! survive a decode/encode pass untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Unknown payload fields, kept verbatim.
pub type Extra = Map<String, Value>;

/// Discriminant of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Auth,
    Join,
    Leave,
    Message,
    Typing,
    Read,
    Reaction,
    Presence,
    Error,
    Ack,
}

impl Kind {
    pub const ALL: [Kind; 10] = [
        Kind::Auth,
        Kind::Join,
        Kind::Leave,
        Kind::Message,
        Kind::Typing,
        Kind::Read,
        Kind::Reaction,
        Kind::Presence,
        Kind::Error,
        Kind::Ack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Auth => "auth",
            Kind::Join => "join",
            Kind::Leave => "leave",
            Kind::Message => "message",
            Kind::Typing => "typing",
            Kind::Read => "read",
            Kind::Reaction => "reaction",
            Kind::Presence => "presence",
            Kind::Error => "error",
            Kind::Ack => "ack",
        }
    }

    /// Whether envelopes of this kind must name a conversation.
    ///
    /// `ack` is decided per envelope, see [`Envelope::requires_conversation`].
    pub fn requires_conversation(self) -> bool {
        !matches!(self, Kind::Auth | Kind::Presence | Kind::Error)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub token: String,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Payload of `join` and `leave`; both carry nothing beyond the conversation id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Server-assigned id, absent on the client's outbound send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Per-conversation sequence number stamped by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "default_true")]
    pub typing: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPayload {
    pub message_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_id: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: String,
    pub emoji: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Coarse availability carried by `presence` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    /// Filled in by the server; clients may leave it empty when refreshing.
    #[serde(default)]
    pub user_id: String,
    pub status: PresenceStatus,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Well-known `error` codes.
pub mod codes {
    pub const AUTH_FAILED: &str = "auth_failed";
    pub const AUTH_REQUIRED: &str = "auth_required";
    pub const NOT_JOINED: &str = "not_joined";
    pub const JOIN_REJECTED: &str = "join_rejected";
    pub const INVALID_ENVELOPE: &str = "invalid_envelope";
    pub const UNKNOWN_KIND: &str = "unknown_kind";
    pub const DECODE_ERROR: &str = "decode_error";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    /// Kind of the envelope this error answers, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub of: Option<Kind>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// Kind of the envelope being acknowledged.
    pub of: Kind,
    /// Authenticated user id (on `auth` acks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Current room members (on `join` acks).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participant_ids: Vec<String>,
    /// Server id of a delivered message (on `message` acks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Typed payload; the variant decides the envelope's [`Kind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Auth(AuthPayload),
    Join(RoomPayload),
    Leave(RoomPayload),
    Message(MessagePayload),
    Typing(TypingPayload),
    Read(ReadPayload),
    Reaction(ReactionPayload),
    Presence(PresencePayload),
    Error(ErrorPayload),
    Ack(AckPayload),
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::Auth(_) => Kind::Auth,
            Payload::Join(_) => Kind::Join,
            Payload::Leave(_) => Kind::Leave,
            Payload::Message(_) => Kind::Message,
            Payload::Typing(_) => Kind::Typing,
            Payload::Read(_) => Kind::Read,
            Payload::Reaction(_) => Kind::Reaction,
            Payload::Presence(_) => Kind::Presence,
            Payload::Error(_) => Kind::Error,
            Payload::Ack(_) => Kind::Ack,
        }
    }
}

/// The unit of wire communication.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: String,
    pub conversation_id: Option<String>,
    pub payload: Payload,
    pub origin_timestamp: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Build an envelope with a fresh id and the current time as origin timestamp.
    pub fn new(conversation_id: Option<String>, payload: Payload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            payload,
            origin_timestamp: Some(Utc::now()),
            correlation_id: None,
        }
    }

    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }

    /// Mark this envelope as a reply to `request_id`.
    pub fn replying_to(mut self, request_id: impl Into<String>) -> Self {
        self.correlation_id = Some(request_id.into());
        self
    }

    pub fn requires_conversation(&self) -> bool {
        match &self.payload {
            Payload::Ack(ack) => !matches!(ack.of, Kind::Auth | Kind::Presence),
            other => other.kind().requires_conversation(),
        }
    }

    pub fn auth(token: impl Into<String>) -> Self {
        Self::new(
            None,
            Payload::Auth(AuthPayload {
                token: token.into(),
                extra: Extra::new(),
            }),
        )
    }

    pub fn join(conversation_id: impl Into<String>) -> Self {
        Self::new(Some(conversation_id.into()), Payload::Join(RoomPayload::default()))
    }

    pub fn leave(conversation_id: impl Into<String>) -> Self {
        Self::new(Some(conversation_id.into()), Payload::Leave(RoomPayload::default()))
    }

    pub fn message(
        conversation_id: impl Into<String>,
        pending_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            Some(conversation_id.into()),
            Payload::Message(MessagePayload {
                pending_id: Some(pending_id.into()),
                content: content.into(),
                ..MessagePayload::default()
            }),
        )
    }

    pub fn typing(conversation_id: impl Into<String>, typing: bool) -> Self {
        Self::new(
            Some(conversation_id.into()),
            Payload::Typing(TypingPayload {
                user_id: None,
                typing,
                extra: Extra::new(),
            }),
        )
    }

    pub fn read(conversation_id: impl Into<String>, message_ids: Vec<String>) -> Self {
        Self::new(
            Some(conversation_id.into()),
            Payload::Read(ReadPayload {
                message_ids,
                ..ReadPayload::default()
            }),
        )
    }

    pub fn reaction(
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        emoji: impl Into<String>,
    ) -> Self {
        Self::new(
            Some(conversation_id.into()),
            Payload::Reaction(ReactionPayload {
                message_id: message_id.into(),
                emoji: emoji.into(),
                user_id: None,
                extra: Extra::new(),
            }),
        )
    }

    pub fn presence(user_id: impl Into<String>, status: PresenceStatus) -> Self {
        Self::new(
            None,
            Payload::Presence(PresencePayload {
                user_id: user_id.into(),
                status,
                extra: Extra::new(),
            }),
        )
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, of: Option<Kind>) -> Self {
        Self::new(
            None,
            Payload::Error(ErrorPayload {
                code: code.into(),
                message: message.into(),
                of,
                extra: Extra::new(),
            }),
        )
    }

    pub fn ack(conversation_id: Option<String>, of: Kind) -> Self {
        Self::new(
            conversation_id,
            Payload::Ack(AckPayload {
                of,
                user_id: None,
                participant_ids: Vec::new(),
                message_id: None,
                extra: Extra::new(),
            }),
        )
    }
}
