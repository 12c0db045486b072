//! Error taxonomy for the indicator service.
//!
//! Each error is contained at its own boundary: per event, per module cycle,
//! per flush. Only an exhausted feed restart budget escalates to a terminal
//! Down state.

use rust_decimal::Decimal;
use thiserror::Error;

/// Failure to establish or keep a streaming connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// Upstream could not be reached.
    #[error("feed unreachable: {0}")]
    Unreachable(String),

    /// Upstream refused the connection or subscription.
    #[error("feed rejected connection: {0}")]
    Rejected(String),

    /// No message arrived within the read timeout.
    #[error("no message within {0}s")]
    ReadTimeout(u64),

    /// Protocol-level failure on an open connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Upstream closed the connection.
    #[error("connection closed: {0}")]
    Closed(String),
}

/// A single inbound event was rejected. Processing continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedEventError {
    /// Payload could not be decoded.
    #[error("undecodable payload: {0}")]
    Decode(String),

    /// Event for a symbol outside the configured set.
    #[error("symbol {0} is not subscribed")]
    UnknownSymbol(String),

    /// Trade size was zero or negative.
    #[error("non-positive size {size} for {symbol}")]
    NonPositiveSize { symbol: String, size: Decimal },

    /// Price was missing, non-finite or non-positive.
    #[error("invalid price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: String },

    /// Accepting the trade would overflow the accumulated volume.
    #[error("volume overflow for {symbol} (size {size})")]
    VolumeOverflow { symbol: String, size: Decimal },
}

/// Module failed its initialisation step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InitError {
    /// Module was configured without any symbols.
    #[error("no symbols configured")]
    NoSymbols,

    /// Initialise was called on an already running module.
    #[error("module already initialized")]
    AlreadyInitialized,

    /// An upstream dependency failed during initialisation.
    #[error("upstream unavailable: {0}")]
    Upstream(String),
}

/// One module update cycle failed. The next cycle is retried normally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateError {
    /// `update` called before a successful `initialize`.
    #[error("module not initialized")]
    NotInitialized,

    /// The module's feed reached its restart budget.
    #[error("feed down after {restarts} restarts")]
    FeedDown { restarts: u32 },

    /// Every outbound call of the cycle failed.
    #[error("all {attempted} upstream requests failed: {last_error}")]
    AllRequestsFailed { attempted: usize, last_error: String },

    /// Upstream request failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The cycle panicked and was caught at the loop boundary.
    #[error("update panicked: {0}")]
    Panicked(String),

    /// The task applying feed events to module state has exited.
    #[error("event applier stopped")]
    ApplierStopped,
}

/// Snapshot write failure. State stays in memory for the next flush.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistError {
    /// Store rejected or failed the operation.
    #[error("store error: {0}")]
    Store(String),

    /// One or both of the current/history writes failed.
    #[error("partial flush failure (upsert: {upsert:?}, append: {append:?})")]
    Partial {
        upsert: Option<String>,
        append: Option<String>,
    },
}

/// Outbound budget is exhausted and the caller asked not to queue.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("outbound rate budget exhausted")]
pub struct RateLimitExceeded;

/// Invalid configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
