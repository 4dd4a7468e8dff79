//! Application state shared across request handlers.

use std::sync::Arc;

use murmur_shared::Envelope;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::presence::PresenceHub;
use crate::rooms::RoomHub;

pub type ConnectionId = Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub rooms: Arc<RoomHub>,
    pub presence: Arc<PresenceHub>,
}

impl AppState {
    pub fn new(config: ServerConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            config: Arc::new(config),
            verifier,
            rooms: Arc::new(RoomHub::new()),
            presence: Arc::new(PresenceHub::new()),
        }
    }
}

/// Queue into one authenticated connection's writer task.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub id: ConnectionId,
    pub user_id: String,
    tx: mpsc::Sender<Envelope>,
}

impl Outbound {
    pub fn new(user_id: impl Into<String>, tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            tx,
        }
    }

    /// Queue without waiting. A full queue drops the envelope.
    pub fn push(&self, envelope: Envelope) -> bool {
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                tracing::warn!(
                    connection = %self.id,
                    user_id = %self.user_id,
                    kind = %envelope.kind(),
                    "outbound queue full, dropping envelope"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
