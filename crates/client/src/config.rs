//! Client configuration from environment variables.

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::ws::{Backoff, ReconnectConfig};

pub const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws/messaging";
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Messaging endpoint, without the token.
    pub url: Url,
    pub token: String,
    /// Local user id until the server's auth ack says otherwise.
    pub user_id: String,
    pub reconnect: ReconnectConfig,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub sound_enabled: bool,
    pub history_url: Option<Url>,
}

impl ClientConfig {
    pub fn new(url: Url, token: impl Into<String>) -> Self {
        Self {
            url,
            token: token.into(),
            user_id: String::new(),
            reconnect: ReconnectConfig::default(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT,
            sound_enabled: true,
            history_url: None,
        }
    }

    /// The URL actually dialed: the endpoint with the token as a query parameter.
    pub fn endpoint(&self) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", &self.token);
        url
    }

    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `MURMUR_URL`: messaging endpoint (default: `ws://127.0.0.1:3000/ws/messaging`)
    /// - `MURMUR_TOKEN`: bearer token (required)
    /// - `MURMUR_USER`: local user id (default: empty, filled in by the server)
    /// - `MURMUR_RECONNECT`: "true" | "false" (default: "true")
    /// - `MURMUR_RECONNECT_DELAY_MS`: base reconnect delay (default: 3000)
    /// - `MURMUR_RECONNECT_MAX_ATTEMPTS`: attempt cap (default: unbounded)
    /// - `MURMUR_BACKOFF`: "fixed" | "exponential" (default: "fixed")
    /// - `MURMUR_AUTH_TIMEOUT_MS`: auth ack deadline (default: 10000)
    /// - `MURMUR_HEARTBEAT_MS`: heartbeat interval (default: 10000)
    /// - `MURMUR_SOUND`: "true" | "false" (default: "true")
    /// - `MURMUR_HISTORY_URL`: REST base url for history backfill (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = Url::parse(&lookup("MURMUR_URL").unwrap_or_else(|| DEFAULT_URL.to_string()))?;
        let token = lookup("MURMUR_TOKEN").ok_or(ConfigError::Missing("MURMUR_TOKEN"))?;

        let mut config = Self::new(url, token);
        if let Some(user_id) = lookup("MURMUR_USER") {
            config.user_id = user_id;
        }

        if let Some(value) = lookup("MURMUR_RECONNECT") {
            config.reconnect.reconnect = parse_bool("MURMUR_RECONNECT", &value)?;
        }
        if let Some(value) = lookup("MURMUR_RECONNECT_DELAY_MS") {
            config.reconnect.delay_ms = parse_num("MURMUR_RECONNECT_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("MURMUR_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = Some(parse_num("MURMUR_RECONNECT_MAX_ATTEMPTS", &value)?);
        }
        if let Some(value) = lookup("MURMUR_BACKOFF") {
            config.reconnect.backoff = match value.to_lowercase().as_str() {
                "fixed" => Backoff::Fixed,
                "exponential" => Backoff::Exponential {
                    multiplier: 2.0,
                    max_delay_ms: 60_000,
                    jitter: 0.2,
                },
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "MURMUR_BACKOFF",
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup("MURMUR_AUTH_TIMEOUT_MS") {
            config.auth_timeout =
                Duration::from_millis(parse_num("MURMUR_AUTH_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("MURMUR_HEARTBEAT_MS") {
            config.heartbeat_interval =
                Duration::from_millis(parse_num("MURMUR_HEARTBEAT_MS", &value)?);
        }
        if let Some(value) = lookup("MURMUR_SOUND") {
            config.sound_enabled = parse_bool("MURMUR_SOUND", &value)?;
        }
        if let Some(value) = lookup("MURMUR_HISTORY_URL") {
            config.history_url = Some(Url::parse(&value)?);
        }

        Ok(config)
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}
