//! Core types, lifecycle traits and configuration for the order-flow service.

pub mod clock;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod restart;
pub mod shutdown;
pub mod state;
pub mod status;
pub mod traits;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    AppConfig, FeedConfig, MetadataConfig, PersistenceConfig, RateLimitConfig, TrendSettings,
};
pub use config_loader::ConfigLoader;
pub use error::{
    ConfigError, ConnectError, InitError, MalformedEventError, PersistError, RateLimitExceeded,
    UpdateError,
};
pub use events::{DepthSnapshot, SymbolEvent, TradeEvent, TradeSide};
pub use restart::{FeedState, RestartDecision, RestartState};
pub use shutdown::{Shutdown, ShutdownToken};
pub use state::{DerivedMetrics, Snapshot, SymbolState, Trend, TrendConfig};
pub use status::{Health, ModuleStatus, SymbolValues};
pub use traits::{IndicatorModule, ModuleKind};
