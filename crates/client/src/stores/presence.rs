//! Presence table keyed by user id.
//!
//! Holds no references into conversations or messages; entries simply age out
//! when their refresh stops arriving, so a peer that vanished without a clean
//! disconnect stops showing as online.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use murmur_shared::PresenceStatus;

/// Default lifetime of an entry without a refresh.
pub const PRESENCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    pub refreshed_at: Instant,
}

#[derive(Debug, Clone)]
pub struct PresenceTable {
    entries: HashMap<String, PresenceEntry>,
    timeout: Duration,
}

impl Default for PresenceTable {
    fn default() -> Self {
        Self::new(PRESENCE_TIMEOUT)
    }
}

impl PresenceTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            timeout,
        }
    }

    /// Record a status. Returns true when the visible status changed.
    pub fn update(&mut self, user_id: &str, status: PresenceStatus, now: Instant) -> bool {
        let previous = self.entries.insert(
            user_id.to_string(),
            PresenceEntry {
                status,
                refreshed_at: now,
            },
        );
        previous.map(|p| p.status) != Some(status)
    }

    pub fn status(&self, user_id: &str) -> Option<PresenceStatus> {
        self.entries.get(user_id).map(|e| e.status)
    }

    /// Availability for display, defaulting to offline for unknown users.
    pub fn availability(&self, user_id: &str) -> PresenceStatus {
        self.status(user_id).unwrap_or(PresenceStatus::Offline)
    }

    /// Drop entries not refreshed within the timeout; returns their user ids.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.timeout;
        let mut expired = Vec::new();
        self.entries.retain(|user_id, entry| {
            let alive = now.saturating_duration_since(entry.refreshed_at) < timeout;
            if !alive {
                expired.push(user_id.clone());
            }
            alive
        });
        expired.sort();
        expired
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
