//! Typed events published by a session.
//!
//! These replace per-component callbacks: any number of consumers can call
//! [`ConnectionManager::subscribe_events`](crate::ws::ConnectionManager::subscribe_events)
//! and each receives every event in the order the transitions happened.

use murmur_shared::{Envelope, PresenceStatus};

use crate::error::SessionError;
use crate::notify::Notification;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Authenticated and ready for commands.
    Connected,
    Disconnected { will_reconnect: bool },
    Error(SessionError),
    /// An inbound envelope accepted after authentication and room filtering.
    Envelope(Envelope),
    Notification(Notification),
    /// A user's presence changed; `None` means the entry expired.
    Presence {
        user_id: String,
        status: Option<PresenceStatus>,
    },
}
