//! Notification fan-out for inbound chat messages.
//!
//! [`NotificationFanout::evaluate`] decides whether an envelope deserves a
//! notification; [`NotificationFanout::deliver`] hands it to the configured
//! sinks. Sinks are best effort: a failing sink is logged and skipped.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use murmur_shared::{Envelope, Payload};

use crate::error::SinkError;

/// How many message ids are remembered for de-duplication.
pub const RECENT_CAPACITY: usize = 200;

const PREVIEW_CHARS: usize = 80;

/// What a sink gets to see: ids and a short preview, never the message itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub preview: String,
}

pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Audible sinks are skipped while sound is disabled.
    fn is_audible(&self) -> bool {
        false
    }

    /// Whether the platform allows this sink to show anything right now.
    fn permitted(&self) -> bool {
        true
    }

    fn notify(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Bounded set of recently notified message ids; oldest evicted first.
#[derive(Debug, Clone)]
struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if the id was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

pub struct NotificationFanout {
    local_user: String,
    focused: Option<String>,
    sound_enabled: bool,
    recent: RecentIds,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for NotificationFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFanout")
            .field("local_user", &self.local_user)
            .field("focused", &self.focused)
            .field("sound_enabled", &self.sound_enabled)
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl NotificationFanout {
    pub fn new(local_user: impl Into<String>, sound_enabled: bool) -> Self {
        Self::with_capacity(local_user, sound_enabled, RECENT_CAPACITY)
    }

    pub fn with_capacity(local_user: impl Into<String>, sound_enabled: bool, capacity: usize) -> Self {
        Self {
            local_user: local_user.into(),
            focused: None,
            sound_enabled,
            recent: RecentIds::new(capacity.max(1)),
            sinks: Vec::new(),
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn set_local_user(&mut self, user_id: impl Into<String>) {
        self.local_user = user_id.into();
    }

    /// The conversation the user is looking at; it never notifies.
    pub fn set_focus(&mut self, conversation_id: Option<String>) {
        self.focused = conversation_id;
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.sound_enabled = enabled;
    }

    pub fn evaluate(&mut self, envelope: &Envelope) -> Option<Notification> {
        let Payload::Message(message) = &envelope.payload else {
            return None;
        };
        let conversation_id = envelope.conversation_id.as_deref()?;
        let message_id = message.id.as_deref()?;
        let sender_id = message.sender_id.as_deref().unwrap_or_default();

        if sender_id == self.local_user || self.focused.as_deref() == Some(conversation_id) {
            return None;
        }
        if !self.recent.insert(message_id) {
            return None;
        }

        Some(Notification {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            preview: message.content.chars().take(PREVIEW_CHARS).collect(),
        })
    }

    /// Returns how many sinks accepted the notification.
    pub fn deliver(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            if sink.is_audible() && !self.sound_enabled {
                continue;
            }
            if !sink.permitted() {
                tracing::trace!(sink = sink.name(), "notification not permitted");
                continue;
            }
            match sink.notify(notification) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(sink = sink.name(), error = %e, "notification sink failed"),
            }
        }
        delivered
    }

    pub fn reset(&mut self) {
        self.recent.clear();
        self.focused = None;
    }
}
