//! Connection state machine.
//!
//! Pure: it never touches a socket or a clock. The driver feeds it [`Input`]s
//! and carries out the [`Effect`]s it returns, in order.

use std::time::Duration;

use super::{ConnectionState, ReconnectConfig};
use crate::error::SessionError;
use crate::ws::events::SessionEvent;

/// Discrete events that move the connection between states.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Caller asked to connect.
    Connect,
    /// Transport finished opening.
    Opened,
    OpenFailed(String),
    /// Server acknowledged our `auth` envelope.
    AuthAccepted,
    AuthRejected(String),
    AuthTimedOut,
    /// Transport dropped without us asking.
    TransportClosed(String),
    HeartbeatMissed,
    TrafficResumed,
    RetryElapsed,
    /// Caller asked to close.
    Disconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Open,
    SendAuth,
    ArmAuthTimer,
    DisarmAuthTimer,
    ReplayJoins,
    ScheduleRetry(Duration),
    CancelRetry,
    /// Drop the current transport.
    Close,
    Emit(SessionEvent),
}

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    /// Consecutive reconnect attempts since the last successful auth.
    attempt: u32,
    retry_pending: bool,
    policy: ReconnectConfig,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            retry_pending: false,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        use ConnectionState::*;

        let from = self.state;
        let effects = match (from, input) {
            (Disconnected, Input::Connect) => {
                self.attempt = 0;
                self.begin_attempt()
            }
            (Disconnected, Input::RetryElapsed) if self.retry_pending => self.begin_attempt(),

            (Connecting, Input::Opened) => {
                self.state = Authenticating;
                vec![Effect::SendAuth, Effect::ArmAuthTimer]
            }
            (Connecting, Input::OpenFailed(reason)) => {
                self.state = Disconnected;
                let mut effects = vec![Effect::Emit(SessionEvent::Error(
                    SessionError::Transport(reason),
                ))];
                effects.extend(self.schedule_retry());
                effects
            }

            (Authenticating, Input::AuthAccepted) => {
                self.state = Ready;
                self.attempt = 0;
                vec![
                    Effect::DisarmAuthTimer,
                    Effect::ReplayJoins,
                    Effect::Emit(SessionEvent::Connected),
                ]
            }
            (Authenticating, Input::AuthRejected(reason)) => {
                self.fail_auth(SessionError::AuthRejected(reason))
            }
            (Authenticating, Input::AuthTimedOut) => self.fail_auth(SessionError::AuthTimeout),

            (Connecting | Authenticating | Ready | Degraded, Input::TransportClosed(reason)) => {
                self.drop_connection(reason)
            }
            (Degraded, Input::HeartbeatMissed) => {
                self.drop_connection("heartbeat timed out".to_string())
            }

            (Ready, Input::HeartbeatMissed) => {
                self.state = Degraded;
                Vec::new()
            }
            (Degraded, Input::TrafficResumed) => {
                self.state = Ready;
                Vec::new()
            }

            (Disconnected, Input::Disconnect) => {
                if self.retry_pending {
                    self.retry_pending = false;
                    vec![Effect::CancelRetry]
                } else {
                    Vec::new()
                }
            }
            (_, Input::Disconnect) => {
                self.state = Disconnected;
                self.retry_pending = false;
                vec![
                    Effect::DisarmAuthTimer,
                    Effect::CancelRetry,
                    Effect::Close,
                    Effect::Emit(SessionEvent::Disconnected {
                        will_reconnect: false,
                    }),
                ]
            }

            (state, input) => {
                tracing::trace!(?state, ?input, "ignoring connection input");
                Vec::new()
            }
        };

        if from != self.state {
            tracing::debug!(from = ?from, to = ?self.state, "connection state changed");
        }
        effects
    }

    fn begin_attempt(&mut self) -> Vec<Effect> {
        self.retry_pending = false;
        self.state = ConnectionState::Connecting;
        vec![Effect::Open]
    }

    /// Auth failures are terminal: surfaced to the caller, never retried.
    fn fail_auth(&mut self, error: SessionError) -> Vec<Effect> {
        self.state = ConnectionState::Disconnected;
        self.retry_pending = false;
        vec![
            Effect::DisarmAuthTimer,
            Effect::Close,
            Effect::Emit(SessionEvent::Error(error)),
            Effect::Emit(SessionEvent::Disconnected {
                will_reconnect: false,
            }),
        ]
    }

    fn drop_connection(&mut self, reason: String) -> Vec<Effect> {
        self.state = ConnectionState::Disconnected;
        let will_reconnect = self.policy.allows(self.attempt);
        let mut effects = vec![
            Effect::DisarmAuthTimer,
            Effect::Close,
            Effect::Emit(SessionEvent::Error(SessionError::Transport(reason))),
            Effect::Emit(SessionEvent::Disconnected { will_reconnect }),
        ];
        effects.extend(self.schedule_retry());
        effects
    }

    fn schedule_retry(&mut self) -> Vec<Effect> {
        if self.policy.allows(self.attempt) {
            let delay = self
                .policy
                .jittered_delay(self.attempt, &mut rand::thread_rng());
            self.attempt += 1;
            self.retry_pending = true;
            vec![Effect::ScheduleRetry(delay)]
        } else if self.policy.reconnect {
            vec![Effect::Emit(SessionEvent::Error(
                SessionError::RetriesExhausted {
                    attempts: self.attempt,
                },
            ))]
        } else {
            Vec::new()
        }
    }
}
