//! Connection state machine and reconnect backoff.
//!
//! LIFECYCLE
//! =========
//! `Disconnected → Connecting → Connected → Backoff → Connecting → ...`
//! until `Shutdown`, which returns to `Disconnected` from any state.
//! Backoff doubles from the initial delay up to the cap and resets once a
//! connection is established.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::BackoffConfig;
use crate::transport::TransportId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Dialing; `attempt` counts consecutive tries since the last success.
    Connecting { attempt: u32 },
    Connected { transport: TransportId },
    /// Waiting `delay` before the next dial.
    Backoff { attempt: u32, delay: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Dial,
    Established(TransportId),
    /// Dial failed.
    Failed,
    /// An established connection dropped.
    Lost,
    RetryElapsed,
    Shutdown,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Next state for `event`. Events that make no sense in the current state
    /// leave it unchanged.
    #[must_use]
    pub fn on(self, event: ConnectionEvent, backoff: &mut Backoff) -> Self {
        match (self, event) {
            (_, ConnectionEvent::Shutdown) => Self::Disconnected,
            (Self::Disconnected, ConnectionEvent::Dial) => Self::Connecting { attempt: 1 },
            (Self::Connecting { .. }, ConnectionEvent::Established(transport)) => {
                backoff.reset();
                Self::Connected { transport }
            }
            (Self::Connecting { attempt }, ConnectionEvent::Failed) => {
                Self::Backoff { attempt, delay: backoff.next_delay() }
            }
            (Self::Connected { .. }, ConnectionEvent::Lost) => Self::Backoff { attempt: 0, delay: backoff.next_delay() },
            (Self::Backoff { attempt, .. }, ConnectionEvent::RetryElapsed) => {
                Self::Connecting { attempt: attempt.saturating_add(1) }
            }
            (state, event) => {
                debug!(?state, ?event, "ignored connection event");
                state
            }
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Connected { transport } => write!(f, "connected ({transport})"),
            Self::Backoff { delay, .. } => write!(f, "reconnecting in {}ms", delay.as_millis()),
        }
    }
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, current: config.initial }
    }

    /// Delay to wait now; doubles the next one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.config.max);
        if self.config.jitter {
            base + jitter(base)
        } else {
            base
        }
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }
}

fn jitter(base: Duration) -> Duration {
    let max_ms = u64::try_from(base.as_millis() / 5).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod connection_test;
