//! Rolling per-symbol order-flow state.
//!
//! `SymbolState` holds the running buy/sell breakdown for one symbol.
//! Invariants maintained by [`SymbolState::apply`]:
//! - `cumulative_delta == buy_volume - sell_volume`
//! - `buy_trade_count + sell_trade_count` equals the number of accepted trades

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::MalformedEventError;
use crate::events::{TradeEvent, TradeSide};

/// Running order-flow statistics for one (module, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolState {
    /// Upper-case symbol
    pub symbol: String,
    /// buy_volume - sell_volume
    pub cumulative_delta: Decimal,
    /// Total taker-buy volume
    pub buy_volume: Decimal,
    /// Total taker-sell volume
    pub sell_volume: Decimal,
    /// Number of taker-buy trades
    pub buy_trade_count: u64,
    /// Number of taker-sell trades
    pub sell_trade_count: u64,
    /// Price of the most recent trade
    pub last_price: Option<Decimal>,
    /// Timestamp of the most recent trade
    pub last_update_time: Option<DateTime<Utc>>,
}

impl SymbolState {
    /// Creates an empty state for a symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            cumulative_delta: Decimal::ZERO,
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
            buy_trade_count: 0,
            sell_trade_count: 0,
            last_price: None,
            last_update_time: None,
        }
    }

    /// Applies a trade.
    ///
    /// # Errors
    /// Returns `MalformedEventError` for non-positive size or price; the state
    /// is left untouched in that case.
    pub fn apply(&mut self, trade: &TradeEvent) -> Result<(), MalformedEventError> {
        if trade.size <= Decimal::ZERO {
            return Err(MalformedEventError::NonPositiveSize {
                symbol: trade.symbol.clone(),
                size: trade.size,
            });
        }
        if trade.price <= Decimal::ZERO {
            return Err(MalformedEventError::InvalidPrice {
                symbol: trade.symbol.clone(),
                price: trade.price.to_string(),
            });
        }

        let (buy_volume, sell_volume) = match trade.side() {
            TradeSide::Buy => (self.buy_volume.checked_add(trade.size), Some(self.sell_volume)),
            TradeSide::Sell => (Some(self.buy_volume), self.sell_volume.checked_add(trade.size)),
        };
        // Total volume must stay representable too
        let (Some(buy_volume), Some(sell_volume)) = (buy_volume, sell_volume) else {
            return Err(self.overflow(trade));
        };
        if buy_volume.checked_add(sell_volume).is_none() {
            return Err(self.overflow(trade));
        }

        match trade.side() {
            TradeSide::Buy => self.buy_trade_count += 1,
            TradeSide::Sell => self.sell_trade_count += 1,
        }
        self.buy_volume = buy_volume;
        self.sell_volume = sell_volume;
        self.cumulative_delta = self.buy_volume - self.sell_volume;
        self.last_price = Some(trade.price);
        self.last_update_time = Some(trade.timestamp);

        Ok(())
    }

    fn overflow(&self, trade: &TradeEvent) -> MalformedEventError {
        MalformedEventError::VolumeOverflow {
            symbol: self.symbol.clone(),
            size: trade.size,
        }
    }

    /// Total number of accepted trades.
    #[must_use]
    pub fn total_trades(&self) -> u64 {
        self.buy_trade_count + self.sell_trade_count
    }

    /// Total traded volume.
    #[must_use]
    pub fn total_volume(&self) -> Decimal {
        self.buy_volume + self.sell_volume
    }

    /// Share of taker-buy volume, 0.5 when nothing has traded yet.
    #[must_use]
    pub fn buy_ratio(&self) -> Decimal {
        let total = self.total_volume();
        if total > Decimal::ZERO {
            self.buy_volume / total
        } else {
            Decimal::new(5, 1)
        }
    }

    /// Classifies the current delta against trade-count scaled thresholds.
    #[must_use]
    pub fn trend(&self, config: &TrendConfig) -> Trend {
        Trend::classify(self.cumulative_delta, self.total_trades(), config)
    }

    /// Derives the read-side metrics.
    #[must_use]
    pub fn metrics(&self, config: &TrendConfig) -> DerivedMetrics {
        DerivedMetrics {
            symbol: self.symbol.clone(),
            buy_ratio: self.buy_ratio(),
            cumulative_delta: self.cumulative_delta,
            total_trades: self.total_trades(),
            last_price: self.last_price,
            trend: self.trend(config),
        }
    }

    /// Takes an immutable point-in-time copy.
    #[must_use]
    pub fn snapshot(&self, captured_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            state: self.clone(),
            captured_at,
        }
    }
}

/// Immutable copy of a `SymbolState` plus the wall-clock time it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: SymbolState,
    pub captured_at: DateTime<Utc>,
}

/// Thresholds for trend classification, as fractions of the trade count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    /// |delta| above `strong_fraction * trades` is a strong trend
    pub strong_fraction: Decimal,
    /// |delta| above `moderate_fraction * trades` is a moderate trend
    pub moderate_fraction: Decimal,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            strong_fraction: Decimal::new(1, 1),
            moderate_fraction: Decimal::new(2, 2),
        }
    }
}

/// Order-flow pressure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    StrongBuy,
    ModerateBuy,
    Neutral,
    ModerateSell,
    StrongSell,
}

impl Trend {
    /// Classifies a delta relative to the number of trades it was built from.
    #[must_use]
    pub fn classify(delta: Decimal, trades: u64, config: &TrendConfig) -> Self {
        let trades = Decimal::from(trades);
        let strong = config.strong_fraction * trades;
        let moderate = config.moderate_fraction * trades;

        if delta > strong {
            Self::StrongBuy
        } else if delta > moderate {
            Self::ModerateBuy
        } else if delta < -strong {
            Self::StrongSell
        } else if delta < -moderate {
            Self::ModerateSell
        } else {
            Self::Neutral
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "strong_buy",
            Self::ModerateBuy => "moderate_buy",
            Self::Neutral => "neutral",
            Self::ModerateSell => "moderate_sell",
            Self::StrongSell => "strong_sell",
        }
    }
}

/// Read-side view of a symbol's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub symbol: String,
    pub buy_ratio: Decimal,
    pub cumulative_delta: Decimal,
    pub total_trades: u64,
    pub last_price: Option<Decimal>,
    pub trend: Trend,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(size: Decimal, is_buyer_maker: bool) -> TradeEvent {
        TradeEvent::new("BTCUSDT", dec!(50000), size, is_buyer_maker, Utc::now())
    }

    #[test]
    fn test_empty_state_is_neutral_with_half_ratio() {
        let state = SymbolState::new("BTCUSDT");

        assert_eq!(state.buy_ratio(), dec!(0.5));
        assert_eq!(state.trend(&TrendConfig::default()), Trend::Neutral);
        assert_eq!(state.total_trades(), 0);
        assert!(state.last_price.is_none());
    }

    #[test]
    fn test_volume_overflow_is_rejected_without_mutation() {
        let mut state = SymbolState::new("BTCUSDT");
        state.apply(&trade(Decimal::MAX, false)).unwrap();
        let before = state.clone();

        let err = state.apply(&trade(Decimal::MAX, false)).unwrap_err();
        assert!(matches!(err, MalformedEventError::VolumeOverflow { .. }));
        // Buy plus sell volume would not fit either
        let err = state.apply(&trade(dec!(1), true)).unwrap_err();
        assert!(matches!(err, MalformedEventError::VolumeOverflow { .. }));
        assert_eq!(state, before);

        assert_eq!(state.total_trades(), 1);
        assert_eq!(state.buy_ratio(), dec!(1));
    }

    #[test]
    fn test_apply_scenario_buy_sell_buy() {
        let mut state = SymbolState::new("BTCUSDT");

        state.apply(&trade(dec!(1.0), false)).unwrap();
        state.apply(&trade(dec!(0.4), true)).unwrap();
        state.apply(&trade(dec!(0.2), false)).unwrap();

        assert_eq!(state.buy_volume, dec!(1.2));
        assert_eq!(state.sell_volume, dec!(0.4));
        assert_eq!(state.cumulative_delta, dec!(0.8));
        assert_eq!(state.buy_ratio(), dec!(0.75));
        assert_eq!(state.buy_trade_count, 2);
        assert_eq!(state.sell_trade_count, 1);
    }

    #[test]
    fn test_delta_invariant_holds_after_every_apply() {
        let mut state = SymbolState::new("BTCUSDT");
        let sizes = [dec!(0.1), dec!(2.5), dec!(0.003), dec!(7), dec!(1.25), dec!(0.5)];

        for (i, size) in sizes.iter().cycle().take(60).enumerate() {
            state.apply(&trade(*size, i % 3 == 0)).unwrap();
            assert_eq!(state.cumulative_delta, state.buy_volume - state.sell_volume);
            assert_eq!(state.total_trades(), (i + 1) as u64);
        }
    }

    #[test]
    fn test_rejects_non_positive_size_without_mutation() {
        let mut state = SymbolState::new("BTCUSDT");
        state.apply(&trade(dec!(1), false)).unwrap();
        let before = state.clone();

        assert!(state.apply(&trade(Decimal::ZERO, false)).is_err());
        assert!(state.apply(&trade(dec!(-1), true)).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let mut state = SymbolState::new("BTCUSDT");
        let bad = TradeEvent::new("BTCUSDT", Decimal::ZERO, dec!(1), false, Utc::now());

        let err = state.apply(&bad).unwrap_err();
        assert!(matches!(err, MalformedEventError::InvalidPrice { .. }));
        assert_eq!(state.total_trades(), 0);
    }

    #[test]
    fn test_last_price_updates_on_both_sides() {
        let mut state = SymbolState::new("BTCUSDT");
        let t1 = TradeEvent::new("BTCUSDT", dec!(100), dec!(1), false, Utc::now());
        let t2 = TradeEvent::new("BTCUSDT", dec!(99), dec!(1), true, Utc::now());

        state.apply(&t1).unwrap();
        state.apply(&t2).unwrap();

        assert_eq!(state.last_price, Some(dec!(99)));
        assert_eq!(state.last_update_time, Some(t2.timestamp));
    }

    #[test]
    fn test_trend_thresholds_scale_with_trade_count() {
        let config = TrendConfig::default();

        // 100 trades: strong above 10, moderate above 2
        assert_eq!(Trend::classify(dec!(11), 100, &config), Trend::StrongBuy);
        assert_eq!(Trend::classify(dec!(10), 100, &config), Trend::ModerateBuy);
        assert_eq!(Trend::classify(dec!(2), 100, &config), Trend::Neutral);
        assert_eq!(Trend::classify(dec!(-3), 100, &config), Trend::ModerateSell);
        assert_eq!(Trend::classify(dec!(-10.5), 100, &config), Trend::StrongSell);

        // Same delta is only moderate for a symbol with five times the trades
        assert_eq!(Trend::classify(dec!(11), 500, &config), Trend::ModerateBuy);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut state = SymbolState::new("BTCUSDT");
        state.apply(&trade(dec!(1), false)).unwrap();
        let now = Utc::now();

        let first = state.snapshot(now);
        let second = state.snapshot(now);
        assert_eq!(first, second);

        state.apply(&trade(dec!(1), true)).unwrap();
        assert_eq!(first.state.sell_volume, Decimal::ZERO);
    }

    #[test]
    fn test_metrics_carry_trend_and_ratio() {
        let mut state = SymbolState::new("BTCUSDT");
        for _ in 0..5 {
            state.apply(&trade(dec!(1), false)).unwrap();
        }

        let metrics = state.metrics(&TrendConfig::default());
        assert_eq!(metrics.buy_ratio, Decimal::ONE);
        assert_eq!(metrics.trend, Trend::StrongBuy);
        assert_eq!(metrics.total_trades, 5);
        assert_eq!(metrics.trend.as_str(), "strong_buy");
    }
}
