//! Connection tracking and presence broadcast.
//!
//! A user is online while at least one of their connections is open. Status
//! refreshes from any connection are broadcast to every connected client.

use std::collections::HashMap;

use murmur_shared::{Envelope, PresenceStatus};
use tokio::sync::RwLock;

use crate::state::{ConnectionId, Outbound};

struct UserPresence {
    status: PresenceStatus,
    connections: HashMap<ConnectionId, Outbound>,
}

#[derive(Default)]
pub struct PresenceHub {
    users: RwLock<HashMap<String, UserPresence>>,
}

impl PresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection. Returns true if it is the user's first.
    pub async fn connect(&self, connection: &Outbound) -> bool {
        let mut users = self.users.write().await;
        let user = users
            .entry(connection.user_id.clone())
            .or_insert_with(|| UserPresence {
                status: PresenceStatus::Online,
                connections: HashMap::new(),
            });
        let was_first = user.connections.is_empty();
        user.connections.insert(connection.id, connection.clone());
        was_first
    }

    /// Forget a connection. Returns true if it was the user's last.
    pub async fn disconnect(&self, connection: &Outbound) -> bool {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&connection.user_id) else {
            return false;
        };
        user.connections.remove(&connection.id);
        if user.connections.is_empty() {
            users.remove(&connection.user_id);
            return true;
        }
        false
    }

    /// Record `user_id`'s status and queue a `presence` envelope to everyone.
    pub async fn broadcast(&self, user_id: &str, status: PresenceStatus) -> usize {
        let envelope = Envelope::presence(user_id, status);
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(user_id) {
            user.status = status;
        }
        let delivered = users
            .values()
            .flat_map(|u| u.connections.values())
            .filter(|c| c.push(envelope.clone()))
            .count();
        tracing::debug!(%user_id, ?status, delivered, "presence broadcast");
        delivered
    }

    /// Current status of every online user other than `except`.
    pub async fn snapshot(&self, except: &str) -> Vec<(String, PresenceStatus)> {
        let mut online: Vec<_> = self
            .users
            .read()
            .await
            .iter()
            .filter(|(id, _)| id.as_str() != except)
            .map(|(id, user)| (id.clone(), user.status))
            .collect();
        online.sort_by(|a, b| a.0.cmp(&b.0));
        online
    }
}
