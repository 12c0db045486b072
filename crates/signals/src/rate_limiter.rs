//! Shared outbound rate limiting for metadata calls.
//!
//! Every poll-based module draws from one limiter. Two bounds apply:
//! - steady throughput, `requests_per_second`, via a governor quota
//! - concurrency, at most `max_in_flight` calls holding a permit
//!
//! ```
//! use orderflow_core::RateLimitConfig;
//! use orderflow_signals::rate_limiter::OutboundRateLimiter;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = OutboundRateLimiter::new(&RateLimitConfig::default());
//!
//!     // Queues until both bounds allow the call
//!     let permit = limiter.acquire().await.unwrap();
//!     // ... issue request ...
//!     drop(permit);
//! }
//! ```

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use orderflow_core::{RateLimitConfig, RateLimitExceeded};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type GovernorLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Rate and concurrency limiter shared by all modules.
#[derive(Clone)]
pub struct OutboundRateLimiter {
    throughput: Arc<GovernorLimiter>,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
    requests_per_second: NonZeroU32,
}

/// Held for the duration of one outbound call; releases its slot on drop.
#[derive(Debug)]
pub struct RatePermit {
    _slot: OwnedSemaphorePermit,
}

impl OutboundRateLimiter {
    /// Builds a limiter; zero values are raised to one.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let requests_per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let max_in_flight = config.max_in_flight.max(1);

        Self {
            throughput: Arc::new(RateLimiter::direct(Quota::per_second(requests_per_second))),
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            requests_per_second,
        }
    }

    /// Waits for a concurrency slot, then for throughput budget.
    ///
    /// # Errors
    /// Only fails if the limiter was closed, which never happens while a
    /// clone is alive.
    pub async fn acquire(&self) -> Result<RatePermit, RateLimitExceeded> {
        let slot = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| RateLimitExceeded)?;
        self.throughput.until_ready().await;
        Ok(RatePermit { _slot: slot })
    }

    /// Takes a permit only if one is available right now.
    ///
    /// # Errors
    /// Returns `RateLimitExceeded` when either bound is exhausted.
    pub fn try_acquire(&self) -> Result<RatePermit, RateLimitExceeded> {
        let slot = Arc::clone(&self.in_flight)
            .try_acquire_owned()
            .map_err(|_| RateLimitExceeded)?;
        self.throughput.check().map_err(|_| RateLimitExceeded)?;
        Ok(RatePermit { _slot: slot })
    }

    /// Calls currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.in_flight.available_permits()
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    #[must_use]
    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second.get()
    }
}

impl std::fmt::Debug for OutboundRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundRateLimiter")
            .field("requests_per_second", &self.requests_per_second)
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}
