//! Server configuration from environment variables.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Token to user id. `None` accepts any token as its own user id.
    pub tokens: Option<HashMap<String, String>>,
    /// How long a new connection has to send its `auth` envelope.
    pub auth_timeout: Duration,
    /// Envelopes queued per connection before further ones are dropped.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            tokens: None,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from the process environment.
    ///
    /// Environment variables:
    /// - `MURMUR_ADDR`: listen address (default: "0.0.0.0:3000")
    /// - `MURMUR_TOKENS`: comma separated `token=user` pairs (default: open, any token is accepted as its own user id)
    /// - `MURMUR_AUTH_TIMEOUT_MS`: auth deadline for new connections (default: 10000)
    /// - `MURMUR_QUEUE_CAPACITY`: outbound queue depth per connection (default: 256)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let addr = lookup("MURMUR_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse()?;

        let tokens = match lookup("MURMUR_TOKENS") {
            Some(value) => Some(parse_tokens(&value)?),
            None => None,
        };

        let auth_timeout = match lookup("MURMUR_AUTH_TIMEOUT_MS") {
            Some(value) => Duration::from_millis(parse_num("MURMUR_AUTH_TIMEOUT_MS", &value)?),
            None => DEFAULT_AUTH_TIMEOUT,
        };

        let queue_capacity = match lookup("MURMUR_QUEUE_CAPACITY") {
            Some(value) => match parse_num("MURMUR_QUEUE_CAPACITY", &value)? {
                0 => {
                    return Err(ConfigError::Invalid {
                        name: "MURMUR_QUEUE_CAPACITY",
                        value,
                    })
                }
                n => n,
            },
            None => DEFAULT_QUEUE_CAPACITY,
        };

        Ok(Self {
            addr,
            tokens,
            auth_timeout,
            queue_capacity,
        })
    }
}

fn parse_tokens(value: &str) -> Result<HashMap<String, String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((token, user)) if !token.is_empty() && !user.is_empty() => {
                Ok((token.to_string(), user.to_string()))
            }
            _ => Err(ConfigError::Invalid {
                name: "MURMUR_TOKENS",
                value: pair.to_string(),
            }),
        })
        .collect()
}

fn parse_num<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}
