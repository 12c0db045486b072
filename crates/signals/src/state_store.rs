//! Per-module symbol state store.
//!
//! One writer (the module's applier task) and many readers (status, flush).
//! Readers copy under a short read lock and never hold it across I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orderflow_core::{
    DerivedMetrics, MalformedEventError, Snapshot, SymbolState, TradeEvent, TrendConfig,
};
use parking_lot::RwLock;

/// Rolling order-flow state keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct SymbolStateStore {
    states: Arc<RwLock<HashMap<String, SymbolState>>>,
    trend: TrendConfig,
}

impl SymbolStateStore {
    #[must_use]
    pub fn new(trend: TrendConfig) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            trend,
        }
    }

    /// Applies a trade, creating the symbol's state on first sight.
    ///
    /// # Errors
    /// Returns `MalformedEventError` if the trade is rejected; nothing is applied.
    pub fn apply(&self, trade: &TradeEvent) -> Result<(), MalformedEventError> {
        let mut states = self.states.write();
        match states.get_mut(&trade.symbol) {
            Some(state) => state.apply(trade),
            None => {
                let mut state = SymbolState::new(&trade.symbol);
                state.apply(trade)?;
                states.insert(trade.symbol.clone(), state);
                Ok(())
            }
        }
    }

    /// Copy of one symbol's state; `None` until its first trade.
    #[must_use]
    pub fn snapshot(&self, symbol: &str, captured_at: DateTime<Utc>) -> Option<Snapshot> {
        self.states
            .read()
            .get(symbol)
            .map(|state| state.snapshot(captured_at))
    }

    /// Copies of every tracked symbol's state, sorted by symbol.
    #[must_use]
    pub fn snapshot_all(&self, captured_at: DateTime<Utc>) -> Vec<Snapshot> {
        let mut snapshots: Vec<Snapshot> = {
            let states = self.states.read();
            states
                .values()
                .map(|state| state.snapshot(captured_at))
                .collect()
        };
        snapshots.sort_by(|a, b| a.state.symbol.cmp(&b.state.symbol));
        snapshots
    }

    /// Derived metrics; a symbol without trades reports neutral defaults.
    #[must_use]
    pub fn metrics(&self, symbol: &str) -> DerivedMetrics {
        let states = self.states.read();
        match states.get(symbol) {
            Some(state) => state.metrics(&self.trend),
            None => SymbolState::new(symbol).metrics(&self.trend),
        }
    }

    #[must_use]
    pub fn trend_config(&self) -> &TrendConfig {
        &self.trend
    }

    /// Number of symbols with at least one applied trade.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::Trend;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trade(symbol: &str, size: Decimal, is_buyer_maker: bool) -> TradeEvent {
        TradeEvent::new(symbol, dec!(50000), size, is_buyer_maker, Utc::now())
    }

    #[test]
    fn test_scenario_buy_sell_buy() {
        let store = SymbolStateStore::new(TrendConfig::default());

        store.apply(&trade("BTCUSDT", dec!(1.0), false)).unwrap();
        store.apply(&trade("BTCUSDT", dec!(0.4), true)).unwrap();
        store.apply(&trade("BTCUSDT", dec!(0.2), false)).unwrap();

        let snapshot = store.snapshot("BTCUSDT", Utc::now()).unwrap();
        assert_eq!(snapshot.state.buy_volume, dec!(1.2));
        assert_eq!(snapshot.state.sell_volume, dec!(0.4));
        assert_eq!(snapshot.state.cumulative_delta, dec!(0.8));
        assert_eq!(store.metrics("BTCUSDT").buy_ratio, dec!(0.75));
    }

    #[test]
    fn test_state_created_lazily() {
        let store = SymbolStateStore::default();
        assert!(store.is_empty());
        assert!(store.snapshot("BTCUSDT", Utc::now()).is_none());

        store.apply(&trade("ETHUSDT", dec!(1), false)).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.snapshot("ETHUSDT", Utc::now()).is_some());
    }

    #[test]
    fn test_rejected_first_trade_creates_no_state() {
        let store = SymbolStateStore::default();

        assert!(store.apply(&trade("BTCUSDT", dec!(0), false)).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_untracked_symbol_metrics_are_neutral() {
        let store = SymbolStateStore::new(TrendConfig::default());
        let metrics = store.metrics("SOLUSDT");

        assert_eq!(metrics.buy_ratio, dec!(0.5));
        assert_eq!(metrics.trend, Trend::Neutral);
        assert_eq!(metrics.total_trades, 0);
    }

    #[test]
    fn test_snapshot_all_sorted_and_stable() {
        let store = SymbolStateStore::default();
        store.apply(&trade("ETHUSDT", dec!(2), true)).unwrap();
        store.apply(&trade("BTCUSDT", dec!(1), false)).unwrap();
        let at = Utc::now();

        let first = store.snapshot_all(at);
        let second = store.snapshot_all(at);

        assert_eq!(first, second);
        let symbols: Vec<&str> = first.iter().map(|s| s.state.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }
}
