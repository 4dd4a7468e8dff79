//! Conversation and message records held by the store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a message is in its delivery lifecycle.
///
/// Ordered: a message only ever moves to a later state, except that `Failed`
/// can go back to `Pending` on retry or on to `Sent` when a late echo arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryState {
    /// Move forward to `next` unless the message is already past it.
    pub(crate) fn advance(&mut self, next: DeliveryState) -> bool {
        let allowed = match (*self, next) {
            (DeliveryState::Failed, DeliveryState::Pending | DeliveryState::Sent) => true,
            (DeliveryState::Failed, _) => false,
            (_, DeliveryState::Failed) => *self == DeliveryState::Pending,
            (current, next) => next > current,
        };
        if allowed {
            *self = next;
        }
        allowed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
    pub at: DateTime<Utc>,
}

/// A message, owned by exactly one [`Conversation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id; `None` until the server echoes our send.
    pub id: Option<String>,
    /// Local id for optimistic sends.
    pub pending_id: Option<String>,
    pub sender_id: String,
    pub content: String,
    /// Server clock.
    pub created_at: Option<DateTime<Utc>>,
    /// Client clock, for display ordering of optimistic entries only.
    pub origin_timestamp: Option<DateTime<Utc>>,
    pub seq: Option<u64>,
    pub delivery_state: DeliveryState,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Identifier the UI can key on before and after confirmation.
    pub fn key(&self) -> &str {
        self.id
            .as_deref()
            .or(self.pending_id.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub id: String,
    pub participant_ids: BTreeSet<String>,
    pub joined: bool,
    /// Append order: optimistic sends by local append time, peers by arrival.
    pub messages: Vec<Message>,
    /// Users currently typing, with the instant of their last refresh.
    pub typing: HashMap<String, Instant>,
    /// Pending ids of sends still awaiting their server echo.
    pub(crate) pending: HashSet<String>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id.as_deref() == Some(id))
    }

    pub fn find_by_pending(&self, pending_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.pending_id.as_deref() == Some(pending_id))
    }

    pub(crate) fn position_by_id(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id.as_deref() == Some(id))
    }

    pub(crate) fn position_by_pending(&self, pending_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.pending_id.as_deref() == Some(pending_id))
    }

    fn unread<'a>(&'a self, local_user: &'a str) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages
            .iter()
            .filter(move |m| m.sender_id != local_user && m.delivery_state != DeliveryState::Read)
    }

    /// Peer messages the local user has not read yet.
    pub fn unread_count(&self, local_user: &str) -> usize {
        self.unread(local_user).count()
    }

    /// Server ids of the unread peer messages, in order.
    pub fn unread_ids(&self, local_user: &str) -> Vec<String> {
        self.unread(local_user).filter_map(|m| m.id.clone()).collect()
    }

    pub fn typing_users(&self) -> BTreeSet<String> {
        self.typing.keys().cloned().collect()
    }

    pub fn is_awaiting_echo(&self, pending_id: &str) -> bool {
        self.pending.contains(pending_id)
    }
}
