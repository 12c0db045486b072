//! Indicator module variants.
//!
//! Stream-backed modules (CVD, order book) own a supervised feed; polled
//! modules (open interest, funding, liquidations) draw on the shared
//! metadata client through the outbound rate limiter.

pub mod cvd;
pub mod orderbook;
pub mod polled;
mod runner;

use std::sync::Arc;
use std::time::Duration;

use orderflow_core::{AppConfig, ModuleKind, SharedClock};
use orderflow_data::{SharedSnapshotStore, SnapshotPersistence};

use crate::metadata::MetadataClient;
use crate::rate_limiter::OutboundRateLimiter;

pub use cvd::CvdModule;
pub use orderbook::{book_values, OrderBookModule};
pub use polled::{PolledModule, PolledVariant};

/// Shared dependencies handed to every module at construction.
#[derive(Clone)]
pub struct ModuleContext {
    pub config: Arc<AppConfig>,
    pub limiter: OutboundRateLimiter,
    pub metadata: Arc<dyn MetadataClient>,
    pub persistence: SnapshotPersistence,
    pub clock: SharedClock,
}

impl ModuleContext {
    /// Builds a context; the rate limiter comes from the config.
    #[must_use]
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataClient>,
        store: SharedSnapshotStore,
        clock: SharedClock,
    ) -> Self {
        Self {
            limiter: OutboundRateLimiter::new(&config.rate_limit),
            config: Arc::new(config),
            metadata,
            persistence: SnapshotPersistence::new(store),
            clock,
        }
    }

    /// Configured symbols, upper-cased and de-duplicated.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.config.normalized_symbols()
    }

    #[must_use]
    pub fn cadence(&self, kind: ModuleKind) -> Duration {
        self.config.cadence_for(kind)
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("symbols", &self.config.symbols)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
