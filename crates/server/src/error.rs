//! Server error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("invalid listen address: {0}")]
    Addr(#[from] std::net::AddrParseError),
}

/// Why a room operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("not joined to conversation {0}")]
    NotJoined(String),

    #[error("cannot join conversation {id:?}: {reason}")]
    Rejected { id: String, reason: &'static str },
}
