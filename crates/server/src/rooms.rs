//! Conversation rooms: membership, sequence numbers and fan-out.
//!
//! Every room sits behind its own `tokio::sync::Mutex`. Stamping a message
//! with the next `seq` and queueing it to each member happen under that lock,
//! so members observe one order per conversation whichever connection sent.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use murmur_shared::Envelope;
use tokio::sync::{Mutex, RwLock};

use crate::error::RoomError;
use crate::state::{ConnectionId, Outbound};

const MAX_CONVERSATION_ID_LEN: usize = 128;

#[derive(Default)]
struct Room {
    seq: u64,
    members: HashMap<ConnectionId, Outbound>,
}

impl Room {
    fn participant_ids(&self) -> Vec<String> {
        self.members
            .values()
            .map(|m| m.user_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn fan_out(&self, envelope: &Envelope) -> usize {
        self.members
            .values()
            .filter(|m| m.push(envelope.clone()))
            .count()
    }
}

/// Global room registry.
#[derive(Default)]
pub struct RoomHub {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
}

fn validate(conversation_id: &str) -> Result<(), RoomError> {
    let reason = if conversation_id.trim().is_empty() {
        "empty id"
    } else if conversation_id.len() > MAX_CONVERSATION_ID_LEN {
        "id too long"
    } else if conversation_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "id contains whitespace"
    } else {
        return Ok(());
    };
    Err(RoomError::Rejected {
        id: conversation_id.to_string(),
        reason,
    })
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room on first join.
    /// Returns the room's participants after the join.
    pub async fn join(
        &self,
        conversation_id: &str,
        member: &Outbound,
    ) -> Result<Vec<String>, RoomError> {
        validate(conversation_id)?;

        // Membership changes hold the registry lock so a room cannot be
        // dropped as empty while someone is joining it.
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(conversation_id.to_string()).or_default().clone();
        let mut room = room.lock().await;
        room.members.insert(member.id, member.clone());
        Ok(room.participant_ids())
    }

    /// Remove a connection from a room. Empty rooms are dropped.
    pub async fn leave(&self, conversation_id: &str, connection: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(conversation_id).cloned() else {
            return false;
        };
        let mut room = room.lock().await;
        let removed = room.members.remove(&connection).is_some();
        if room.members.is_empty() {
            rooms.remove(conversation_id);
        }
        removed
    }

    async fn room(&self, conversation_id: &str) -> Result<Arc<Mutex<Room>>, RoomError> {
        self.rooms
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| RoomError::NotJoined(conversation_id.to_string()))
    }

    /// Stamp the next sequence number and queue the result to every member.
    ///
    /// `build` runs under the room lock; the sender must be a member.
    pub async fn publish<F>(
        &self,
        conversation_id: &str,
        sender: ConnectionId,
        build: F,
    ) -> Result<Envelope, RoomError>
    where
        F: FnOnce(u64) -> Envelope,
    {
        let room = self.room(conversation_id).await?;
        let mut room = room.lock().await;
        if !room.members.contains_key(&sender) {
            return Err(RoomError::NotJoined(conversation_id.to_string()));
        }
        room.seq += 1;
        let envelope = build(room.seq);
        let delivered = room.fan_out(&envelope);
        tracing::debug!(%conversation_id, seq = room.seq, delivered, "published");
        Ok(envelope)
    }

    /// Queue an unsequenced envelope (typing, read, reaction) to every member.
    pub async fn relay(
        &self,
        conversation_id: &str,
        sender: ConnectionId,
        envelope: &Envelope,
    ) -> Result<usize, RoomError> {
        let room = self.room(conversation_id).await?;
        let room = room.lock().await;
        if !room.members.contains_key(&sender) {
            return Err(RoomError::NotJoined(conversation_id.to_string()));
        }
        Ok(room.fan_out(envelope))
    }
}
