//! Murmur reference server: a WebSocket room server for the murmur protocol.
//!
//! Authenticates each connection with a bearer token, tracks room membership
//! and presence, and stamps every chat message with a server id and a
//! per-conversation sequence number before echoing it to the room.

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod error;
pub mod presence;
pub mod rooms;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use state::AppState;

/// Build the router serving `/ws/messaging`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/messaging", get(ws::ws_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
