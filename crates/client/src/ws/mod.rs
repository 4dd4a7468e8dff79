//! Real-time connection to the messaging service.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  ConnectionManager                   │
//! │   driver task: socket, timers, control requests      │
//! └──────────────────────────────────────────────────────┘
//!                          │  Arc<Mutex<Session>>
//!                          ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                       Session                        │
//! │  ConnectionMachine · SubscriptionRegistry · Store    │
//! │  NotificationFanout · pending ops · event bus        │
//! └──────────────────────────────────────────────────────┘
//!          ▲                               │
//!          │ Commands                      │ SessionEvent / Change
//!   ┌────────────┐                  ┌────────────┐
//!   │   caller   │                  │ observers  │
//!   └────────────┘                  └────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = ClientConfig::from_env()?;
//! let manager = ConnectionManager::new(config, Arc::new(WebSocketConnector::default()));
//! let mut events = manager.subscribe_events();
//! manager.connect();
//!
//! while let Ok(event) = events.recv().await {
//!     if event == SessionEvent::Connected {
//!         manager.commands().join_conversation("c1");
//!     }
//! }
//! ```

pub mod connection;
pub mod events;
mod manager;
pub(crate) mod session;
pub mod transport;

pub use connection::native::WebSocketConnector;
pub use connection::{Backoff, ConnectionMachine, ConnectionState, Effect, Input, ReconnectConfig};
pub use events::SessionEvent;
pub use manager::{ConnectionManager, EVENT_CAPACITY, HISTORY_PAGE, HOUSEKEEPING_INTERVAL};
pub use transport::{Connector, Frame, FrameSink, FrameStream, TransportLink};
