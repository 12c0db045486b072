//! Market events consumed by the indicator modules.
//!
//! Trades carry the taker side through Binance's `m` (buyer is maker) flag,
//! the same convention the upstream feed uses on the wire.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of a trade determined by the aggressor.
///
/// - `Buy`: Buyer was the aggressor (taker), lifted the ask
/// - `Sell`: Seller was the aggressor (taker), hit the bid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    /// Buyer was the aggressor (taker)
    Buy,
    /// Seller was the aggressor (taker)
    Sell,
}

impl TradeSide {
    /// Converts from the `m` (buyer is maker) flag.
    ///
    /// ```
    /// use orderflow_core::TradeSide;
    ///
    /// assert_eq!(TradeSide::from_maker_flag(true), TradeSide::Sell);
    /// assert_eq!(TradeSide::from_maker_flag(false), TradeSide::Buy);
    /// ```
    #[must_use]
    pub const fn from_maker_flag(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            Self::Sell
        } else {
            Self::Buy
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// A single executed trade as delivered by the feed.
///
/// Immutable once built; applied exactly once by the owning state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Upper-case market symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Execution price
    pub price: Decimal,
    /// Executed quantity in base currency
    pub size: Decimal,
    /// True when the buyer was the resting (maker) order
    pub is_buyer_maker: bool,
    /// Exchange trade time
    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    /// Creates a trade event, normalising the symbol to upper case.
    pub fn new(
        symbol: impl Into<String>,
        price: Decimal,
        size: Decimal,
        is_buyer_maker: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            price,
            size,
            is_buyer_maker,
            timestamp,
        }
    }

    /// Returns the taker side of the trade.
    #[must_use]
    pub fn side(&self) -> TradeSide {
        TradeSide::from_maker_flag(self.is_buyer_maker)
    }

    /// Returns true when the buyer was the taker.
    #[must_use]
    pub fn is_buy(&self) -> bool {
        self.side() == TradeSide::Buy
    }
}

/// Top-of-book depth snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// Upper-case market symbol
    pub symbol: String,
    /// Bid levels as (price, quantity), best first
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask levels as (price, quantity), best first
    pub asks: Vec<(Decimal, Decimal)>,
    /// Exchange event time
    pub timestamp: DateTime<Utc>,
}

impl DepthSnapshot {
    /// Total resting bid quantity.
    #[must_use]
    pub fn bid_volume(&self) -> Decimal {
        self.bids.iter().map(|(_, qty)| *qty).sum()
    }

    /// Total resting ask quantity.
    #[must_use]
    pub fn ask_volume(&self) -> Decimal {
        self.asks.iter().map(|(_, qty)| *qty).sum()
    }
}

/// Events the feed supervisor can route by symbol.
pub trait SymbolEvent: Send + 'static {
    /// Symbol the event belongs to.
    fn symbol(&self) -> &str;
}

impl SymbolEvent for TradeEvent {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl SymbolEvent for DepthSnapshot {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}
