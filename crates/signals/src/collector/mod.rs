//! Streaming feed collectors.
//!
//! A [`FeedSupervisor`] owns one upstream connection opened through a
//! [`FeedConnector`] and forwards events into a bounded channel. The
//! connectors in [`binance`] speak the Binance Futures combined-stream
//! protocol; tests drive the supervisor through a scripted connector.

pub mod binance;
mod feed;
mod types;

#[cfg(test)]
pub(crate) mod scripted;

pub use binance::{BinanceDepthConnector, BinanceTradeConnector};
pub use feed::{FeedConnector, FeedHandle, FeedMessage, FeedStream, FeedSupervisor};
pub use types::{FeedCounters, FeedStats, SupervisorConfig};
