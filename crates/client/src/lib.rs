//! Murmur client: real-time messaging and presence over a single WebSocket.
//!
//! [`ConnectionManager`] owns the connection and exposes the session's state
//! through a watch channel, an event bus, per-conversation store observers and
//! the [`Commands`] handle.

pub mod api_client;
pub mod audio;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod registry;
pub mod stores;
pub mod ws;

pub use api_client::{ConversationSummary, HistoryMessage, HistorySource, RestHistory};
pub use commands::Commands;
pub use config::ClientConfig;
pub use error::{ConfigError, SessionError, SinkError, TransportError};
pub use notify::{Notification, NotificationFanout, NotificationSink};
pub use registry::SubscriptionRegistry;
pub use stores::{Change, Conversation, ConversationStore, DeliveryState, Message, ObserverId};
pub use ws::{ConnectionManager, ConnectionState, ReconnectConfig, SessionEvent, WebSocketConnector};
