//! Shared types for feed collectors.
//!
//! Supervisor configuration and the counters every feed exposes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use orderflow_core::FeedConfig;
use serde::Serialize;

/// Configuration for one feed supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Name used in logs (e.g., "cvd")
    pub name: String,
    /// Upper-case symbols to subscribe
    pub symbols: Vec<String>,
    /// Consecutive failures tolerated before going Down
    pub max_restarts: u32,
    /// Upper bound on the reconnect delay
    pub backoff_cap: Duration,
    /// Silence longer than this counts as connection loss
    pub read_timeout: Duration,
    /// Capacity of the dispatch channel
    pub channel_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "feed".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            max_restarts: 10,
            backoff_cap: Duration::from_secs(60),
            read_timeout: Duration::from_secs(30),
            channel_capacity: 10_000,
        }
    }
}

impl SupervisorConfig {
    /// Creates a supervisor config for a set of symbols.
    pub fn new(name: impl Into<String>, symbols: &[String]) -> Self {
        Self {
            name: name.into(),
            symbols: symbols.iter().map(|s| s.to_uppercase()).collect(),
            ..Default::default()
        }
    }

    /// Copies restart, timeout and channel settings from the feed section.
    #[must_use]
    pub fn with_feed_config(mut self, feed: &FeedConfig) -> Self {
        self.max_restarts = feed.max_restarts;
        self.backoff_cap = feed.backoff_cap();
        self.read_timeout = feed.read_timeout();
        self.channel_capacity = feed.channel_capacity;
        self
    }

    #[must_use]
    pub fn with_max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = max;
        self
    }

    #[must_use]
    pub fn with_backoff_cap(mut self, cap: Duration) -> Self {
        self.backoff_cap = cap;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// Lock-free counters shared between a supervisor and its handle.
#[derive(Debug, Default)]
pub struct FeedCounters {
    received: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    connects: AtomicU64,
}

impl FeedCounters {
    /// Records an event accepted for dispatch. Returns the new total.
    pub fn record_received(&self) -> u64 {
        self.received.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records an event dropped on a full channel. Returns the new total.
    pub fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a rejected event. Returns the new total.
    pub fn record_malformed(&self) -> u64 {
        self.malformed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a connection attempt. Returns the new total.
    pub fn record_connect(&self) -> u64 {
        self.connects.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Point-in-time copy.
    #[must_use]
    pub fn snapshot(&self) -> FeedStats {
        FeedStats {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for a running feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    /// Events accepted for dispatch
    pub received: u64,
    /// Events dropped because the consumer was behind
    pub dropped: u64,
    /// Events rejected as malformed or unsubscribed
    pub malformed: u64,
    /// Connection attempts, successful or not
    pub connects: u64,
}
