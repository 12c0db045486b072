//! Reconnection bookkeeping for a streaming feed.
//!
//! The supervisor moves through:
//!
//! ```text
//! Idle -> Connecting -> Connected
//!             ^              |
//!             |         (loss/error)
//!             |              v
//!        Reconnecting <- restart_count < max_restarts
//!                            |
//!                  restart_count >= max_restarts
//!                            v
//!                          Down
//! ```
//!
//! A healthy update cycle resets `restart_count` to zero.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::Health;

/// Restart budget of one feed supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartState {
    pub restart_count: u32,
    pub max_restarts: u32,
    pub last_restart_time: Option<DateTime<Utc>>,
}

/// What the supervisor should do after a connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Wait `delay`, then reconnect as attempt `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted, go Down.
    Exhausted,
}

impl RestartState {
    /// Creates a fresh budget.
    #[must_use]
    pub fn new(max_restarts: u32) -> Self {
        Self {
            restart_count: 0,
            max_restarts,
            last_restart_time: None,
        }
    }

    /// Records a connection loss and decides whether to retry.
    pub fn record_failure(&mut self, now: DateTime<Utc>, backoff_cap: Duration) -> RestartDecision {
        self.restart_count = self.restart_count.saturating_add(1);
        self.last_restart_time = Some(now);

        if self.is_exhausted() {
            RestartDecision::Exhausted
        } else {
            RestartDecision::Retry {
                attempt: self.restart_count,
                delay: self.backoff(backoff_cap),
            }
        }
    }

    /// Forgives earlier instability after a healthy cycle.
    pub fn reset(&mut self) {
        self.restart_count = 0;
    }

    /// True once the budget is spent.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.restart_count >= self.max_restarts
    }

    /// `min(2^restart_count, cap)` seconds.
    #[must_use]
    pub fn backoff(&self, cap: Duration) -> Duration {
        let secs = 1u64.checked_shl(self.restart_count).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(cap)
    }
}

/// Connection state published by a feed supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedState {
    /// Not started yet
    Idle,
    /// Connection attempt in flight
    Connecting,
    /// Subscribed and receiving
    Connected,
    /// Waiting for the backoff window before `attempt`
    Reconnecting {
        attempt: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Restart budget exhausted; needs external reset
    Down,
    /// Stopped on request
    Stopped,
}

impl FeedState {
    /// Maps the connection state onto module health.
    #[must_use]
    pub fn health(&self) -> Health {
        match self {
            Self::Connected => Health::Healthy,
            Self::Down => Health::Down,
            Self::Idle | Self::Connecting | Self::Reconnecting { .. } | Self::Stopped => {
                Health::Degraded
            }
        }
    }

    /// Returns true for the terminal Down state.
    #[must_use]
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Down)
    }
}
