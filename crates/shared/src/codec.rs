//! JSON codec for [`Envelope`]s.
//!
//! Decoding happens in two steps: the outer frame is read into a loosely typed
//! wire struct, then the kind string and payload are checked. This keeps an
//! unknown `kind` a typed [`DecodeError`] instead of a generic parse failure,
//! and lets [`decode_frame`] turn any failure into a local `error` envelope.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{codes, Envelope, Kind, Payload};
use crate::error::{DecodeError, EncodeError};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(default)]
    id: String,
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

/// Serialize an envelope to its JSON wire form.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    let payload = match &envelope.payload {
        Payload::Auth(p) => serde_json::to_value(p)?,
        Payload::Join(p) | Payload::Leave(p) => serde_json::to_value(p)?,
        Payload::Message(p) => serde_json::to_value(p)?,
        Payload::Typing(p) => serde_json::to_value(p)?,
        Payload::Read(p) => serde_json::to_value(p)?,
        Payload::Reaction(p) => serde_json::to_value(p)?,
        Payload::Presence(p) => serde_json::to_value(p)?,
        Payload::Error(p) => serde_json::to_value(p)?,
        Payload::Ack(p) => serde_json::to_value(p)?,
    };

    let wire = WireEnvelope {
        id: envelope.id.clone(),
        kind: envelope.kind().as_str().to_string(),
        conversation_id: envelope.conversation_id.clone(),
        payload,
        origin_timestamp: envelope.origin_timestamp,
        correlation_id: envelope.correlation_id.clone(),
    };

    Ok(serde_json::to_vec(&wire)?)
}

/// Encode straight to a `String`, for text WebSocket frames.
pub fn encode_text(envelope: &Envelope) -> Result<String, EncodeError> {
    let bytes = encode(envelope)?;
    String::from_utf8(bytes).map_err(|e| EncodeError::Utf8(e.to_string()))
}

fn payload_as<T: DeserializeOwned>(kind: Kind, id: &str, value: Value) -> Result<T, DecodeError> {
    // A bare `join` may omit its payload entirely.
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidPayload {
        kind,
        id: id.to_string(),
        source,
    })
}

/// Parse and validate one frame.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let wire: WireEnvelope = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;

    let kind: Kind = wire.kind.parse().map_err(|kind| DecodeError::UnknownKind {
        kind,
        id: wire.id.clone(),
    })?;

    let id = wire.id.as_str();
    let payload = match kind {
        Kind::Auth => Payload::Auth(payload_as(kind, id, wire.payload)?),
        Kind::Join => Payload::Join(payload_as(kind, id, wire.payload)?),
        Kind::Leave => Payload::Leave(payload_as(kind, id, wire.payload)?),
        Kind::Message => Payload::Message(payload_as(kind, id, wire.payload)?),
        Kind::Typing => Payload::Typing(payload_as(kind, id, wire.payload)?),
        Kind::Read => Payload::Read(payload_as(kind, id, wire.payload)?),
        Kind::Reaction => Payload::Reaction(payload_as(kind, id, wire.payload)?),
        Kind::Presence => Payload::Presence(payload_as(kind, id, wire.payload)?),
        Kind::Error => Payload::Error(payload_as(kind, id, wire.payload)?),
        Kind::Ack => Payload::Ack(payload_as(kind, id, wire.payload)?),
    };

    let envelope = Envelope {
        id: wire.id,
        conversation_id: wire.conversation_id.filter(|c| !c.is_empty()),
        payload,
        origin_timestamp: wire.origin_timestamp,
        correlation_id: wire.correlation_id,
    };

    if envelope.requires_conversation() && envelope.conversation_id.is_none() {
        return Err(DecodeError::MissingConversation {
            kind,
            id: envelope.id,
        });
    }

    Ok(envelope)
}

/// Decode a frame, converting any failure into a locally produced `error`
/// envelope. Never fails, so a receive loop can treat every frame uniformly.
pub fn decode_frame(bytes: &[u8]) -> Envelope {
    decode(bytes).unwrap_or_else(|e| e.to_envelope())
}

impl DecodeError {
    /// The local `error` envelope standing in for an undecodable frame.
    pub fn to_envelope(&self) -> Envelope {
        let (code, of, id) = match self {
            DecodeError::Malformed(_) => (codes::DECODE_ERROR, None, None),
            DecodeError::UnknownKind { id, .. } => (codes::UNKNOWN_KIND, None, Some(id)),
            DecodeError::MissingConversation { kind, id }
            | DecodeError::InvalidPayload { kind, id, .. } => {
                (codes::DECODE_ERROR, Some(*kind), Some(id))
            }
        };

        let envelope = Envelope::error(code, self.to_string(), of);
        match id {
            Some(id) if !id.is_empty() => envelope.replying_to(id.clone()),
            _ => envelope,
        }
    }

    /// True for errors produced by [`decode_frame`] rather than a remote peer.
    pub fn is_local_code(code: &str) -> bool {
        code == codes::DECODE_ERROR || code == codes::UNKNOWN_KIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{AckPayload, MessagePayload, PresenceStatus};
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let env = Envelope::message("c1", "p1", "salam");
        let value: Value = serde_json::from_slice(&encode(&env).unwrap()).unwrap();

        assert_eq!(value["kind"], "message");
        assert_eq!(value["conversationId"], "c1");
        assert_eq!(value["payload"]["pendingId"], "p1");
        assert_eq!(value["payload"]["content"], "salam");
        assert!(value["payload"].get("id").is_none());
        assert!(value.get("correlationId").is_none());
    }

    #[test]
    fn test_decode_server_echo() {
        let frame = json!({
            "id": "e1",
            "kind": "message",
            "conversationId": "c1",
            "payload": {"id": "m42", "pendingId": "p1", "senderId": "u1", "content": "salam"}
        });
        let env = decode(frame.to_string().as_bytes()).unwrap();

        assert_eq!(env.kind(), Kind::Message);
        assert_eq!(env.conversation_id.as_deref(), Some("c1"));
        match env.payload {
            Payload::Message(MessagePayload { id, pending_id, sender_id, .. }) => {
                assert_eq!(id.as_deref(), Some("m42"));
                assert_eq!(pending_id.as_deref(), Some("p1"));
                assert_eq!(sender_id.as_deref(), Some("u1"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_is_typed_error() {
        let frame = json!({"id": "x9", "kind": "poke", "conversationId": "c1", "payload": {}});
        let err = decode(frame.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownKind { ref kind, .. } if kind == "poke"));

        let local = decode_frame(frame.to_string().as_bytes());
        assert_eq!(local.kind(), Kind::Error);
        assert_eq!(local.correlation_id.as_deref(), Some("x9"));
        match local.payload {
            Payload::Error(e) => assert_eq!(e.code, codes::UNKNOWN_KIND),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_garbage_becomes_error_envelope() {
        let local = decode_frame(b"{not json");
        match local.payload {
            Payload::Error(e) => {
                assert_eq!(e.code, codes::DECODE_ERROR);
                assert!(DecodeError::is_local_code(&e.code));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_missing_conversation_rejected() {
        let frame = json!({"id": "a", "kind": "typing", "payload": {"typing": true}});
        let err = decode(frame.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingConversation { kind: Kind::Typing, .. }));
    }

    #[test]
    fn test_conversation_optional_for_auth_presence_error_and_auth_ack() {
        for frame in [
            json!({"id": "1", "kind": "auth", "payload": {"token": "t"}}),
            json!({"id": "2", "kind": "presence", "payload": {"userId": "u2", "status": "away"}}),
            json!({"id": "3", "kind": "error", "payload": {"code": "x", "message": "y"}}),
            json!({"id": "4", "kind": "ack", "payload": {"of": "auth", "userId": "u1"}}),
        ] {
            decode(frame.to_string().as_bytes()).unwrap();
        }

        let join_ack = json!({"id": "5", "kind": "ack", "payload": {"of": "join"}});
        assert!(decode(join_ack.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_payload_fields_survive() {
        let frame = json!({
            "id": "e2",
            "kind": "presence",
            "payload": {"userId": "u2", "status": "online", "device": "phone", "battery": 40}
        });
        let env = decode(frame.to_string().as_bytes()).unwrap();
        if let Payload::Presence(p) = &env.payload {
            assert_eq!(p.status, PresenceStatus::Online);
            assert_eq!(p.extra.get("device"), Some(&json!("phone")));
        } else {
            panic!("expected presence");
        }

        let again: Value = serde_json::from_slice(&encode(&env).unwrap()).unwrap();
        assert_eq!(again["payload"]["battery"], 40);
    }

    #[test]
    fn test_join_without_payload() {
        let frame = json!({"id": "j", "kind": "join", "conversationId": "c7"});
        let env = decode(frame.to_string().as_bytes()).unwrap();
        assert_eq!(env.kind(), Kind::Join);
    }

    #[test]
    fn test_ack_participants() {
        let frame = json!({
            "id": "k",
            "kind": "ack",
            "conversationId": "c1",
            "correlationId": "j1",
            "payload": {"of": "join", "participantIds": ["u1", "u2"]}
        });
        let env = decode(frame.to_string().as_bytes()).unwrap();
        assert_eq!(env.correlation_id.as_deref(), Some("j1"));
        match env.payload {
            Payload::Ack(AckPayload { of, participant_ids, .. }) => {
                assert_eq!(of, Kind::Join);
                assert_eq!(participant_ids, vec!["u1".to_string(), "u2".to_string()]);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
