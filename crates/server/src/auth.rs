//! Token verification for the `auth` handshake.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ServerConfig;

/// Maps a bearer token to the user it authenticates.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// The user id for `token`, or `None` if it is not valid.
    async fn verify(&self, token: &str) -> Option<String>;
}

/// Fixed token table, usually from `MURMUR_TOKENS`.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokens {
    async fn verify(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Development mode: any non-empty token is accepted as its own user id.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenTokens;

#[async_trait]
impl TokenVerifier for OpenTokens {
    async fn verify(&self, token: &str) -> Option<String> {
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}

/// Pick the verifier the configuration asks for.
pub fn from_config(config: &ServerConfig) -> Arc<dyn TokenVerifier> {
    match &config.tokens {
        Some(tokens) => Arc::new(StaticTokens::new(tokens.clone())),
        None => {
            tracing::warn!("MURMUR_TOKENS not set, accepting any token as its own user id");
            Arc::new(OpenTokens)
        }
    }
}
