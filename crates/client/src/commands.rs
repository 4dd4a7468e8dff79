//! Outbound command API.
//!
//! A cheap, cloneable handle over the shared session. Every command refuses
//! with `false` (or `None`) and leaves no trace when the session is not ready;
//! nothing is queued for later.

use std::sync::{Arc, Mutex};

use murmur_shared::PresenceStatus;

use crate::ws::session::{lock, Session};

#[derive(Clone)]
pub struct Commands {
    session: Arc<Mutex<Session>>,
}

impl std::fmt::Debug for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands").finish_non_exhaustive()
    }
}

impl Commands {
    pub(crate) fn new(session: Arc<Mutex<Session>>) -> Self {
        Self { session }
    }

    /// Join optimistically; inbound traffic for the conversation is accepted
    /// immediately. Joining an already joined conversation is a no-op.
    pub fn join_conversation(&self, conversation_id: &str) -> bool {
        lock(&self.session).join_conversation(conversation_id)
    }

    /// Stop processing the conversation right away and tell the server.
    pub fn leave_conversation(&self, conversation_id: &str) -> bool {
        lock(&self.session).leave_conversation(conversation_id)
    }

    /// Append an optimistic message and send it. Returns its pending id.
    pub fn send_chat_message(&self, conversation_id: &str, content: &str) -> Option<String> {
        lock(&self.session).send_chat_message(conversation_id, content)
    }

    pub fn retry_message(&self, conversation_id: &str, pending_id: &str) -> bool {
        lock(&self.session).retry_message(conversation_id, pending_id)
    }

    pub fn send_typing(&self, conversation_id: &str, typing: bool) -> bool {
        lock(&self.session).send_typing(conversation_id, typing)
    }

    pub fn mark_message_read(&self, conversation_id: &str, message_ids: Vec<String>) -> bool {
        lock(&self.session).mark_message_read(conversation_id, message_ids)
    }

    /// The reaction shows up in the store once the server broadcasts it.
    pub fn add_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> bool {
        lock(&self.session).add_reaction(conversation_id, message_id, emoji)
    }

    pub fn set_presence(&self, status: PresenceStatus) -> bool {
        lock(&self.session).set_presence(status)
    }
}
