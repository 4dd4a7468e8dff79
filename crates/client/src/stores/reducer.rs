//! Store transitions as plain functions over [`StoreState`].
//!
//! Every mutation of conversation state, optimistic or server-confirmed, goes
//! through [`apply`]. It returns the [`Change`]s it made so the store can fan
//! them out to observers; an empty vector means the action was a no-op.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use murmur_shared::{MessagePayload, PresenceStatus};

use super::messages::{Conversation, DeliveryState, Message, Reaction};
use super::presence::PresenceTable;

/// How long a typing indicator survives without a refresh.
pub const TYPING_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct StoreState {
    pub local_user: String,
    pub conversations: HashMap<String, Conversation>,
    pub presence: PresenceTable,
    pub typing_window: Duration,
}

impl StoreState {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            conversations: HashMap::new(),
            presence: PresenceTable::default(),
            typing_window: TYPING_WINDOW,
        }
    }

    fn conversation_mut(&mut self, id: &str) -> &mut Conversation {
        self.conversations
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Server acknowledged our join.
    Joined {
        conversation_id: String,
        participant_ids: Vec<String>,
    },
    /// We left, or the server rejected our join.
    Left { conversation_id: String },
    LocalSend {
        conversation_id: String,
        pending_id: String,
        content: String,
        origin_timestamp: DateTime<Utc>,
    },
    Inbound {
        conversation_id: String,
        payload: MessagePayload,
        origin_timestamp: Option<DateTime<Utc>>,
    },
    Delivered {
        conversation_id: String,
        message_id: String,
    },
    SendFailed {
        conversation_id: String,
        pending_id: String,
    },
    Retry {
        conversation_id: String,
        pending_id: String,
    },
    /// Transport lost: nothing still pending will be confirmed on this link.
    FailAllPending,
    LocalRead {
        conversation_id: String,
        message_ids: Vec<String>,
    },
    PeerRead {
        conversation_id: String,
        reader_id: String,
        message_ids: Vec<String>,
    },
    Typing {
        conversation_id: String,
        user_id: String,
        typing: bool,
        now: Instant,
    },
    ExpireTyping { now: Instant },
    Reaction {
        conversation_id: String,
        message_id: String,
        user_id: String,
        emoji: String,
        at: DateTime<Utc>,
    },
    Presence {
        user_id: String,
        status: PresenceStatus,
        now: Instant,
    },
    ExpirePresence { now: Instant },
    History {
        conversation_id: String,
        messages: Vec<Message>,
    },
    /// Session teardown.
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Joined { conversation_id: String },
    Left { conversation_id: String },
    Removed { conversation_id: String },
    MessageAppended { conversation_id: String, key: String },
    MessageConfirmed {
        conversation_id: String,
        pending_id: String,
        id: String,
    },
    DeliveryChanged {
        conversation_id: String,
        key: String,
        state: DeliveryState,
    },
    TypingChanged {
        conversation_id: String,
        users: BTreeSet<String>,
    },
    ReactionAdded {
        conversation_id: String,
        message_id: String,
    },
    HistoryLoaded { conversation_id: String, added: usize },
    PresenceChanged {
        user_id: String,
        status: Option<PresenceStatus>,
    },
    Cleared,
}

impl Change {
    /// Conversation this change belongs to; `None` for store-wide changes.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Change::Joined { conversation_id }
            | Change::Left { conversation_id }
            | Change::Removed { conversation_id }
            | Change::MessageAppended { conversation_id, .. }
            | Change::MessageConfirmed { conversation_id, .. }
            | Change::DeliveryChanged { conversation_id, .. }
            | Change::TypingChanged { conversation_id, .. }
            | Change::ReactionAdded { conversation_id, .. }
            | Change::HistoryLoaded { conversation_id, .. } => Some(conversation_id),
            Change::PresenceChanged { .. } | Change::Cleared => None,
        }
    }
}

pub fn apply(state: &mut StoreState, action: Action) -> Vec<Change> {
    match action {
        Action::Joined {
            conversation_id,
            participant_ids,
        } => {
            let conv = state.conversation_mut(&conversation_id);
            conv.joined = true;
            if !participant_ids.is_empty() {
                conv.participant_ids = participant_ids.into_iter().collect();
            }
            vec![Change::Joined { conversation_id }]
        }

        Action::Left { conversation_id } => {
            let Some(conv) = state.conversations.get_mut(&conversation_id) else {
                return Vec::new();
            };
            conv.joined = false;
            conv.typing.clear();
            let mut changes = vec![Change::Left {
                conversation_id: conversation_id.clone(),
            }];
            // Keep cached history around so the conversation can be reopened.
            if conv.messages.is_empty() {
                state.conversations.remove(&conversation_id);
                changes.push(Change::Removed { conversation_id });
            }
            changes
        }

        Action::LocalSend {
            conversation_id,
            pending_id,
            content,
            origin_timestamp,
        } => {
            let sender_id = state.local_user.clone();
            let conv = state.conversation_mut(&conversation_id);
            conv.pending.insert(pending_id.clone());
            conv.messages.push(Message {
                id: None,
                pending_id: Some(pending_id.clone()),
                sender_id,
                content,
                created_at: None,
                origin_timestamp: Some(origin_timestamp),
                seq: None,
                delivery_state: DeliveryState::Pending,
                reactions: Vec::new(),
            });
            vec![Change::MessageAppended {
                conversation_id,
                key: pending_id,
            }]
        }

        Action::Inbound {
            conversation_id,
            payload,
            origin_timestamp,
        } => apply_inbound(state, conversation_id, payload, origin_timestamp),

        Action::Delivered {
            conversation_id,
            message_id,
        } => {
            let local = state.local_user.clone();
            let Some(conv) = state.conversations.get_mut(&conversation_id) else {
                return Vec::new();
            };
            let Some(pos) = conv.position_by_id(&message_id) else {
                return Vec::new();
            };
            let message = &mut conv.messages[pos];
            if message.sender_id == local && message.delivery_state.advance(DeliveryState::Delivered)
            {
                vec![Change::DeliveryChanged {
                    conversation_id,
                    key: message_id,
                    state: DeliveryState::Delivered,
                }]
            } else {
                Vec::new()
            }
        }

        Action::SendFailed {
            conversation_id,
            pending_id,
        } => set_pending_state(state, conversation_id, pending_id, DeliveryState::Failed),

        Action::Retry {
            conversation_id,
            pending_id,
        } => {
            let is_failed = state
                .conversations
                .get(&conversation_id)
                .and_then(|c| c.find_by_pending(&pending_id))
                .map_or(false, |m| m.delivery_state == DeliveryState::Failed);
            if !is_failed {
                return Vec::new();
            }
            set_pending_state(state, conversation_id, pending_id, DeliveryState::Pending)
        }

        Action::FailAllPending => {
            let mut changes = Vec::new();
            for conv in state.conversations.values_mut() {
                for message in conv.messages.iter_mut() {
                    if message.delivery_state == DeliveryState::Pending
                        && message.delivery_state.advance(DeliveryState::Failed)
                    {
                        changes.push(Change::DeliveryChanged {
                            conversation_id: conv.id.clone(),
                            key: message.key().to_string(),
                            state: DeliveryState::Failed,
                        });
                    }
                }
            }
            changes
        }

        Action::LocalRead {
            conversation_id,
            message_ids,
        } => {
            let local = state.local_user.clone();
            mark_read(state, conversation_id, &message_ids, |m| m.sender_id != local)
        }

        Action::PeerRead {
            conversation_id,
            reader_id,
            message_ids,
        } => {
            let local = state.local_user.clone();
            if reader_id == local {
                // Our own read, echoed from another session of the same user.
                mark_read(state, conversation_id, &message_ids, |m| m.sender_id != local)
            } else {
                mark_read(state, conversation_id, &message_ids, |m| m.sender_id == local)
            }
        }

        Action::Typing {
            conversation_id,
            user_id,
            typing,
            now,
        } => {
            if user_id == state.local_user {
                return Vec::new();
            }
            let conv = state.conversation_mut(&conversation_id);
            let changed = if typing {
                conv.typing.insert(user_id, now).is_none()
            } else {
                conv.typing.remove(&user_id).is_some()
            };
            if changed {
                vec![Change::TypingChanged {
                    users: conv.typing_users(),
                    conversation_id,
                }]
            } else {
                Vec::new()
            }
        }

        Action::ExpireTyping { now } => {
            let window = state.typing_window;
            let mut changes = Vec::new();
            for conv in state.conversations.values_mut() {
                let before = conv.typing.len();
                conv.typing
                    .retain(|_, refreshed| now.saturating_duration_since(*refreshed) < window);
                if conv.typing.len() != before {
                    changes.push(Change::TypingChanged {
                        conversation_id: conv.id.clone(),
                        users: conv.typing_users(),
                    });
                }
            }
            changes
        }

        Action::Reaction {
            conversation_id,
            message_id,
            user_id,
            emoji,
            at,
        } => {
            let Some(conv) = state.conversations.get_mut(&conversation_id) else {
                return Vec::new();
            };
            let Some(pos) = conv.position_by_id(&message_id) else {
                tracing::debug!(%conversation_id, %message_id, "reaction for unknown message");
                return Vec::new();
            };
            conv.messages[pos].reactions.push(Reaction { user_id, emoji, at });
            vec![Change::ReactionAdded {
                conversation_id,
                message_id,
            }]
        }

        Action::Presence {
            user_id,
            status,
            now,
        } => {
            if state.presence.update(&user_id, status, now) {
                vec![Change::PresenceChanged {
                    user_id,
                    status: Some(status),
                }]
            } else {
                Vec::new()
            }
        }

        Action::ExpirePresence { now } => state
            .presence
            .expire(now)
            .into_iter()
            .map(|user_id| Change::PresenceChanged {
                user_id,
                status: None,
            })
            .collect(),

        Action::History {
            conversation_id,
            messages,
        } => {
            let conv = state.conversation_mut(&conversation_id);
            let mut older: Vec<Message> = messages
                .into_iter()
                .filter(|m| match m.id.as_deref() {
                    Some(id) => conv.find_by_id(id).is_none(),
                    None => false,
                })
                .collect();
            let added = older.len();
            if added == 0 {
                return Vec::new();
            }
            older.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            older.append(&mut conv.messages);
            conv.messages = older;
            vec![Change::HistoryLoaded {
                conversation_id,
                added,
            }]
        }

        Action::Reset => {
            state.conversations.clear();
            state.presence.clear();
            vec![Change::Cleared]
        }
    }
}

fn apply_inbound(
    state: &mut StoreState,
    conversation_id: String,
    payload: MessagePayload,
    origin_timestamp: Option<DateTime<Utc>>,
) -> Vec<Change> {
    let local = state.local_user.clone();
    let conv = state.conversation_mut(&conversation_id);

    // Server echo of one of our own sends: confirm in place, never append.
    if let Some(pending_id) = payload.pending_id.as_deref() {
        if let Some(pos) = conv.position_by_pending(pending_id) {
            let message = &mut conv.messages[pos];
            if message.id.is_some() {
                return Vec::new();
            }
            let Some(id) = payload.id.clone() else {
                return Vec::new();
            };
            message.id = Some(id.clone());
            message.created_at = payload.created_at;
            message.seq = payload.seq;
            message.delivery_state.advance(DeliveryState::Sent);
            conv.pending.remove(pending_id);
            return vec![Change::MessageConfirmed {
                conversation_id,
                pending_id: pending_id.to_string(),
                id,
            }];
        }
    }

    if let Some(id) = payload.id.as_deref() {
        if conv.position_by_id(id).is_some() {
            return Vec::new();
        }
    }

    let sender_id = payload.sender_id.unwrap_or_default();
    let delivery_state = if sender_id == local {
        DeliveryState::Sent
    } else {
        DeliveryState::Delivered
    };
    let message = Message {
        id: payload.id,
        pending_id: None,
        sender_id,
        content: payload.content,
        created_at: payload.created_at,
        origin_timestamp,
        seq: payload.seq,
        delivery_state,
        reactions: Vec::new(),
    };
    let key = message.key().to_string();
    conv.messages.push(message);
    vec![Change::MessageAppended {
        conversation_id,
        key,
    }]
}

fn set_pending_state(
    state: &mut StoreState,
    conversation_id: String,
    pending_id: String,
    next: DeliveryState,
) -> Vec<Change> {
    let Some(conv) = state.conversations.get_mut(&conversation_id) else {
        return Vec::new();
    };
    let Some(pos) = conv.position_by_pending(&pending_id) else {
        return Vec::new();
    };
    if conv.messages[pos].delivery_state.advance(next) {
        vec![Change::DeliveryChanged {
            conversation_id,
            key: pending_id,
            state: next,
        }]
    } else {
        Vec::new()
    }
}

fn mark_read(
    state: &mut StoreState,
    conversation_id: String,
    message_ids: &[String],
    eligible: impl Fn(&Message) -> bool,
) -> Vec<Change> {
    let Some(conv) = state.conversations.get_mut(&conversation_id) else {
        return Vec::new();
    };
    let mut changes = Vec::new();
    for message in conv.messages.iter_mut() {
        let Some(id) = message.id.as_deref() else {
            continue;
        };
        if message_ids.iter().any(|m| m == id)
            && eligible(message)
            && message.delivery_state.advance(DeliveryState::Read)
        {
            changes.push(Change::DeliveryChanged {
                conversation_id: conversation_id.clone(),
                key: id.to_string(),
                state: DeliveryState::Read,
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(pending_id: &str, id: &str, sender: &str, content: &str) -> Action {
        Action::Inbound {
            conversation_id: "c1".into(),
            payload: MessagePayload {
                id: Some(id.into()),
                pending_id: Some(pending_id.into()),
                sender_id: Some(sender.into()),
                content: content.into(),
                ..MessagePayload::default()
            },
            origin_timestamp: None,
        }
    }

    fn peer(id: &str, sender: &str) -> Action {
        Action::Inbound {
            conversation_id: "c1".into(),
            payload: MessagePayload {
                id: Some(id.into()),
                sender_id: Some(sender.into()),
                content: "hey".into(),
                ..MessagePayload::default()
            },
            origin_timestamp: None,
        }
    }

    fn send(pending_id: &str, content: &str) -> Action {
        Action::LocalSend {
            conversation_id: "c1".into(),
            pending_id: pending_id.into(),
            content: content.into(),
            origin_timestamp: Utc::now(),
        }
    }

    fn joined(state: &mut StoreState) {
        apply(
            state,
            Action::Joined {
                conversation_id: "c1".into(),
                participant_ids: vec!["u1".into(), "u2".into()],
            },
        );
    }

    #[test]
    fn test_echo_confirms_in_place() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        apply(&mut state, send("p1", "salam"));

        let changes = apply(&mut state, echo("p1", "m42", "u1", "salam"));
        assert_eq!(
            changes,
            vec![Change::MessageConfirmed {
                conversation_id: "c1".into(),
                pending_id: "p1".into(),
                id: "m42".into(),
            }]
        );

        let conv = &state.conversations["c1"];
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].id.as_deref(), Some("m42"));
        assert_eq!(conv.messages[0].delivery_state, DeliveryState::Sent);
        assert!(!conv.is_awaiting_echo("p1"));
    }

    #[test]
    fn test_duplicate_echo_is_noop() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        apply(&mut state, send("p1", "salam"));
        apply(&mut state, echo("p1", "m42", "u1", "salam"));

        assert!(apply(&mut state, echo("p1", "m42", "u1", "salam")).is_empty());
        assert_eq!(state.conversations["c1"].messages.len(), 1);
    }

    #[test]
    fn test_local_sends_keep_send_order() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        for i in 0..5 {
            apply(&mut state, send(&format!("p{i}"), &format!("msg {i}")));
        }
        let order: Vec<_> = state.conversations["c1"]
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(order, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn test_echo_out_of_order_keeps_positions() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        apply(&mut state, send("p1", "first"));
        apply(&mut state, send("p2", "second"));
        apply(&mut state, echo("p2", "m2", "u1", "second"));
        apply(&mut state, echo("p1", "m1", "u1", "first"));

        let ids: Vec<_> = state.conversations["c1"]
            .messages
            .iter()
            .map(|m| m.id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_peer_message_appends_and_dedups() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        assert_eq!(apply(&mut state, peer("m7", "u2")).len(), 1);
        assert!(apply(&mut state, peer("m7", "u2")).is_empty());

        let conv = &state.conversations["c1"];
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].delivery_state, DeliveryState::Delivered);
        assert_eq!(conv.unread_count("u1"), 1);
    }

    #[test]
    fn test_typing_expires_after_window() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        let start = Instant::now();
        apply(
            &mut state,
            Action::Typing {
                conversation_id: "c1".into(),
                user_id: "u2".into(),
                typing: true,
                now: start,
            },
        );
        assert!(state.conversations["c1"].typing.contains_key("u2"));

        assert!(apply(
            &mut state,
            Action::ExpireTyping {
                now: start + Duration::from_millis(1999)
            }
        )
        .is_empty());

        let changes = apply(
            &mut state,
            Action::ExpireTyping {
                now: start + Duration::from_secs(2),
            },
        );
        assert_eq!(
            changes,
            vec![Change::TypingChanged {
                conversation_id: "c1".into(),
                users: BTreeSet::new(),
            }]
        );
    }

    #[test]
    fn test_typing_refresh_and_stop() {
        let mut state = StoreState::new("u1");
        let start = Instant::now();
        let typing = |typing, now| Action::Typing {
            conversation_id: "c1".into(),
            user_id: "u2".into(),
            typing,
            now,
        };
        apply(&mut state, typing(true, start));
        // A refresh is not a visible change but moves the expiry forward.
        assert!(apply(&mut state, typing(true, start + Duration::from_millis(1500))).is_empty());
        assert!(apply(
            &mut state,
            Action::ExpireTyping {
                now: start + Duration::from_millis(2500)
            }
        )
        .is_empty());

        assert_eq!(apply(&mut state, typing(false, start + Duration::from_secs(3))).len(), 1);
        assert!(state.conversations["c1"].typing.is_empty());
    }

    #[test]
    fn test_own_typing_ignored() {
        let mut state = StoreState::new("u1");
        let changes = apply(
            &mut state,
            Action::Typing {
                conversation_id: "c1".into(),
                user_id: "u1".into(),
                typing: true,
                now: Instant::now(),
            },
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_reads_in_both_directions() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        apply(&mut state, send("p1", "salam"));
        apply(&mut state, echo("p1", "m1", "u1", "salam"));
        apply(&mut state, peer("m2", "u2"));

        apply(
            &mut state,
            Action::LocalRead {
                conversation_id: "c1".into(),
                message_ids: vec!["m1".into(), "m2".into()],
            },
        );
        let conv = &state.conversations["c1"];
        // Our own message is untouched by our read.
        assert_eq!(conv.messages[0].delivery_state, DeliveryState::Sent);
        assert_eq!(conv.messages[1].delivery_state, DeliveryState::Read);
        assert_eq!(conv.unread_count("u1"), 0);

        apply(
            &mut state,
            Action::PeerRead {
                conversation_id: "c1".into(),
                reader_id: "u2".into(),
                message_ids: vec!["m1".into()],
            },
        );
        assert_eq!(
            state.conversations["c1"].messages[0].delivery_state,
            DeliveryState::Read
        );
    }

    #[test]
    fn test_delivered_ack_and_failure_paths() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        apply(&mut state, send("p1", "one"));
        apply(&mut state, send("p2", "two"));
        apply(&mut state, echo("p1", "m1", "u1", "one"));

        apply(
            &mut state,
            Action::Delivered {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
            },
        );
        let changes = apply(&mut state, Action::FailAllPending);
        assert_eq!(changes.len(), 1);

        let conv = &state.conversations["c1"];
        assert_eq!(conv.messages[0].delivery_state, DeliveryState::Delivered);
        assert_eq!(conv.messages[1].delivery_state, DeliveryState::Failed);
        assert!(conv.is_awaiting_echo("p2"));

        let retry = Action::Retry {
            conversation_id: "c1".into(),
            pending_id: "p2".into(),
        };
        assert_eq!(apply(&mut state, retry.clone()).len(), 1);
        assert!(apply(&mut state, retry).is_empty());
    }

    #[test]
    fn test_late_echo_recovers_failed_send() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        apply(&mut state, send("p1", "salam"));
        apply(
            &mut state,
            Action::SendFailed {
                conversation_id: "c1".into(),
                pending_id: "p1".into(),
            },
        );
        apply(&mut state, echo("p1", "m42", "u1", "salam"));

        let conv = &state.conversations["c1"];
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].delivery_state, DeliveryState::Sent);
    }

    #[test]
    fn test_reactions_append_without_dedup() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        apply(&mut state, peer("m7", "u2"));
        let react = || Action::Reaction {
            conversation_id: "c1".into(),
            message_id: "m7".into(),
            user_id: "u1".into(),
            emoji: "👍".into(),
            at: Utc::now(),
        };
        apply(&mut state, react());
        apply(&mut state, react());
        assert_eq!(state.conversations["c1"].messages[0].reactions.len(), 2);
    }

    #[test]
    fn test_leave_keeps_cached_history() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        apply(&mut state, peer("m7", "u2"));
        apply(
            &mut state,
            Action::Left {
                conversation_id: "c1".into(),
            },
        );
        assert!(!state.conversations["c1"].joined);

        apply(
            &mut state,
            Action::Joined {
                conversation_id: "c2".into(),
                participant_ids: vec![],
            },
        );
        let changes = apply(
            &mut state,
            Action::Left {
                conversation_id: "c2".into(),
            },
        );
        assert!(changes.contains(&Change::Removed {
            conversation_id: "c2".into()
        }));
        assert!(!state.conversations.contains_key("c2"));
    }

    #[test]
    fn test_history_prepends_missing_messages() {
        let mut state = StoreState::new("u1");
        joined(&mut state);
        apply(&mut state, peer("m3", "u2"));

        let old = |id: &str, secs: i64| Message {
            id: Some(id.into()),
            pending_id: None,
            sender_id: "u2".into(),
            content: id.into(),
            created_at: DateTime::from_timestamp(secs, 0),
            origin_timestamp: None,
            seq: None,
            delivery_state: DeliveryState::Read,
            reactions: Vec::new(),
        };
        let changes = apply(
            &mut state,
            Action::History {
                conversation_id: "c1".into(),
                messages: vec![old("m2", 20), old("m1", 10), old("m3", 30)],
            },
        );
        assert_eq!(
            changes,
            vec![Change::HistoryLoaded {
                conversation_id: "c1".into(),
                added: 2
            }]
        );
        let ids: Vec<_> = state.conversations["c1"]
            .messages
            .iter()
            .map(|m| m.id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }
}
