//! Conversation state store.
//!
//! Wraps [`StoreState`] with an observer list. All writes go through
//! [`ConversationStore::apply`], so every observer sees every change in the
//! order it happened.

pub mod messages;
pub mod presence;
pub mod reducer;

use std::collections::HashMap;

use murmur_shared::PresenceStatus;

pub use messages::{Conversation, DeliveryState, Message, Reaction};
pub use presence::{PresenceEntry, PresenceTable, PRESENCE_TIMEOUT};
pub use reducer::{apply, Action, Change, StoreState, TYPING_WINDOW};

/// Handle returned by [`ConversationStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Callback = Box<dyn FnMut(&Change) + Send>;

struct Observer {
    /// `None` observes every change, including store-wide ones.
    conversation_id: Option<String>,
    callback: Callback,
}

pub struct ConversationStore {
    state: StoreState,
    observers: HashMap<ObserverId, Observer>,
    next_observer: u64,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ConversationStore {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            state: StoreState::new(local_user),
            observers: HashMap::new(),
            next_observer: 0,
        }
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn local_user(&self) -> &str {
        &self.state.local_user
    }

    /// Set once the server tells us who we authenticated as.
    pub fn set_local_user(&mut self, user_id: impl Into<String>) {
        self.state.local_user = user_id.into();
    }

    /// Apply an action and notify observers of what changed.
    pub fn apply(&mut self, action: Action) -> Vec<Change> {
        let changes = reducer::apply(&mut self.state, action);
        for change in &changes {
            let scope = change.conversation_id();
            for observer in self.observers.values_mut() {
                let interested = match (&observer.conversation_id, scope) {
                    (None, _) => true,
                    (Some(wanted), Some(id)) => wanted == id,
                    // Store-wide changes (reset) concern every conversation.
                    (Some(_), None) => matches!(change, Change::Cleared),
                };
                if interested {
                    (observer.callback)(change);
                }
            }
        }
        changes
    }

    /// Observe changes to one conversation.
    pub fn subscribe<F>(&mut self, conversation_id: impl Into<String>, callback: F) -> ObserverId
    where
        F: FnMut(&Change) + Send + 'static,
    {
        self.add_observer(Some(conversation_id.into()), Box::new(callback))
    }

    /// Observe every change, presence included.
    pub fn subscribe_all<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&Change) + Send + 'static,
    {
        self.add_observer(None, Box::new(callback))
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    fn add_observer(&mut self, conversation_id: Option<String>, callback: Callback) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.insert(
            id,
            Observer {
                conversation_id,
                callback,
            },
        );
        id
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.state.conversations.get(id)
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.conversations.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn unread_count(&self, conversation_id: &str) -> usize {
        self.conversation(conversation_id)
            .map_or(0, |c| c.unread_count(&self.state.local_user))
    }

    pub fn presence(&self, user_id: &str) -> PresenceStatus {
        self.state.presence.availability(user_id)
    }
}
