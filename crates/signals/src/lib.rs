//! Feed supervision, rolling order-flow state and the indicator modules.

pub mod collector;
pub mod common;
pub mod metadata;
pub mod modules;
pub mod rate_limiter;
pub mod registry;
pub mod state_store;

pub use collector::{
    BinanceDepthConnector, BinanceTradeConnector, FeedConnector, FeedHandle, FeedMessage,
    FeedStats, FeedStream, FeedSupervisor, SupervisorConfig,
};
pub use metadata::{BinanceMetadataClient, MetadataClient, MetadataError};
pub use modules::{CvdModule, ModuleContext, OrderBookModule, PolledModule, PolledVariant};
pub use rate_limiter::{OutboundRateLimiter, RatePermit};
pub use registry::{ModuleFactory, ModuleRegistry};
pub use state_store::SymbolStateStore;
