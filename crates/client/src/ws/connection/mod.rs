//! Connection lifecycle types: the observable state, the reconnect policy and
//! the pure state machine that drives them.

use std::time::Duration;

use rand::Rng;

mod machine;
pub mod native;

pub use machine::{ConnectionMachine, Effect, Input};

/// Lifecycle of the single messaging connection of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    /// Authenticated but the heartbeat went unanswered.
    Degraded,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Authenticating
        )
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::Degraded)
    }
}

/// Delay growth between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed,
    /// `delay_ms * multiplier^attempt`, capped at `max_delay_ms`, then reduced
    /// by up to `jitter` (a ratio in `0.0..=1.0`) at random.
    Exponential {
        multiplier: f32,
        max_delay_ms: u64,
        jitter: f32,
    },
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Whether dropped connections are retried at all.
    pub reconnect: bool,
    /// Base delay in milliseconds
    pub delay_ms: u64,
    /// Maximum number of consecutive attempts (`None` = infinite)
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            delay_ms: 3000,
            max_attempts: None,
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectConfig {
    /// Whether attempt number `attempt` (0-based) may still be made.
    pub fn allows(&self, attempt: u32) -> bool {
        self.reconnect && self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay before a given attempt, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => Duration::from_millis(self.delay_ms),
            Backoff::Exponential {
                multiplier,
                max_delay_ms,
                ..
            } => {
                let exp = attempt.min(i32::MAX as u32) as i32;
                let delay = self.delay_ms as f64 * (*multiplier as f64).powi(exp);
                Duration::from_millis((delay as u64).min(*max_delay_ms))
            }
        }
    }

    /// Delay before a given attempt, with jitter applied when configured.
    pub fn jittered_delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.delay_for_attempt(attempt);
        match self.backoff {
            Backoff::Exponential { jitter, .. } if jitter > 0.0 => {
                let cut = base.as_secs_f64() * jitter.clamp(0.0, 1.0) as f64 * rng.gen::<f64>();
                base.saturating_sub(Duration::from_secs_f64(cut))
            }
            _ => base,
        }
    }
}
