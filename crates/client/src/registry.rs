//! Conversations this session has joined.
//!
//! `join` is optimistic: the id counts as joined the moment it is added, and
//! inbound traffic for it is accepted right away. The server's `ack` confirms
//! the entry; its `error` reverts it.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    /// Joined ids and whether the server has confirmed them.
    joined: BTreeMap<String, bool>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when already joined; joining twice is a no-op.
    pub fn join(&mut self, conversation_id: &str) -> bool {
        if self.joined.contains_key(conversation_id) {
            return false;
        }
        self.joined.insert(conversation_id.to_string(), false);
        true
    }

    pub fn leave(&mut self, conversation_id: &str) -> bool {
        self.joined.remove(conversation_id).is_some()
    }

    pub fn is_joined(&self, conversation_id: &str) -> bool {
        self.joined.contains_key(conversation_id)
    }

    pub fn joined_ids(&self) -> BTreeSet<String> {
        self.joined.keys().cloned().collect()
    }

    pub fn confirm(&mut self, conversation_id: &str) -> bool {
        match self.joined.get_mut(conversation_id) {
            Some(confirmed) => {
                *confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Undo an optimistic join the server refused.
    pub fn revert(&mut self, conversation_id: &str) -> bool {
        self.leave(conversation_id)
    }

    pub fn is_confirmed(&self, conversation_id: &str) -> bool {
        self.joined.get(conversation_id).copied().unwrap_or(false)
    }

    /// A fresh transport must confirm every room again.
    pub fn unconfirm_all(&mut self) {
        for confirmed in self.joined.values_mut() {
            *confirmed = false;
        }
    }

    pub fn clear(&mut self) {
        self.joined.clear();
    }

    pub fn len(&self) -> usize {
        self.joined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.join("c1"));
        assert!(!registry.join("c1"));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_joined("c1"));
        assert!(!registry.is_confirmed("c1"));
    }

    #[test]
    fn test_confirm_and_revert() {
        let mut registry = SubscriptionRegistry::new();
        registry.join("c1");
        registry.join("c2");

        assert!(registry.confirm("c1"));
        assert!(registry.is_confirmed("c1"));
        assert!(!registry.confirm("c3"));

        assert!(registry.revert("c2"));
        assert!(!registry.is_joined("c2"));
        assert_eq!(registry.joined_ids(), BTreeSet::from(["c1".to_string()]));

        registry.unconfirm_all();
        assert!(registry.is_joined("c1"));
        assert!(!registry.is_confirmed("c1"));
    }

    #[test]
    fn test_leave_unknown_returns_false() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.leave("c1"));
        registry.join("c1");
        assert!(registry.leave("c1"));
        assert!(registry.is_empty());
    }
}
