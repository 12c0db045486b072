//! Snapshot records written to the "current" and "history" views.
//!
//! Every indicator variant persists the same shape: a (module, symbol) key,
//! the capture time, and a bag of named decimal values. Stream-backed
//! modules additionally carry the time of the last applied event.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use orderflow_core::{Snapshot, SymbolValues};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One persisted point-in-time copy of a module's per-symbol state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Module name (e.g., "cvd")
    pub module: String,
    /// Upper-case symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Wall-clock time the copy was taken
    pub captured_at: DateTime<Utc>,
    /// Time of the most recent event folded into the values
    pub last_update_time: Option<DateTime<Utc>>,
    /// Named numeric values
    pub values: BTreeMap<String, Decimal>,
    /// Optional categorical signal
    pub signal: Option<String>,
}

impl SnapshotRecord {
    /// Builds a record from a symbol-state snapshot.
    pub fn from_snapshot(module: &str, snapshot: &Snapshot, signal: Option<String>) -> Self {
        let state = &snapshot.state;
        let mut values = BTreeMap::new();
        values.insert("cumulative_delta".to_string(), state.cumulative_delta);
        values.insert("buy_volume".to_string(), state.buy_volume);
        values.insert("sell_volume".to_string(), state.sell_volume);
        values.insert(
            "buy_trade_count".to_string(),
            Decimal::from(state.buy_trade_count),
        );
        values.insert(
            "sell_trade_count".to_string(),
            Decimal::from(state.sell_trade_count),
        );
        if let Some(price) = state.last_price {
            values.insert("last_price".to_string(), price);
        }

        Self {
            module: module.to_string(),
            symbol: state.symbol.clone(),
            captured_at: snapshot.captured_at,
            last_update_time: state.last_update_time,
            values,
            signal,
        }
    }

    /// Builds a record from a module's reported values.
    pub fn from_values(
        module: &str,
        symbol: &str,
        captured_at: DateTime<Utc>,
        last_update_time: Option<DateTime<Utc>>,
        values: &SymbolValues,
    ) -> Self {
        Self {
            module: module.to_string(),
            symbol: symbol.to_string(),
            captured_at,
            last_update_time,
            values: values.metrics.clone(),
            signal: values.signal.clone(),
        }
    }

    /// Key of the "current" view.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.module.clone(), self.symbol.clone())
    }

    /// Looks up a value by name.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<Decimal> {
        self.values.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::{SymbolState, TradeEvent};
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_snapshot_copies_state() {
        let mut state = SymbolState::new("BTCUSDT");
        let trade = TradeEvent::new("BTCUSDT", dec!(50000), dec!(1.5), false, Utc::now());
        state.apply(&trade).unwrap();
        let snapshot = state.snapshot(Utc::now());

        let record =
            SnapshotRecord::from_snapshot("cvd", &snapshot, Some("strong_buy".to_string()));

        assert_eq!(record.key(), ("cvd".to_string(), "BTCUSDT".to_string()));
        assert_eq!(record.value("cumulative_delta"), Some(dec!(1.5)));
        assert_eq!(record.value("buy_trade_count"), Some(dec!(1)));
        assert_eq!(record.value("last_price"), Some(dec!(50000)));
        assert_eq!(record.last_update_time, Some(trade.timestamp));
        assert_eq!(record.signal.as_deref(), Some("strong_buy"));
    }

    #[test]
    fn test_from_snapshot_without_trades_has_no_price() {
        let snapshot = SymbolState::new("ETHUSDT").snapshot(Utc::now());
        let record = SnapshotRecord::from_snapshot("cvd", &snapshot, None);

        assert!(record.value("last_price").is_none());
        assert_eq!(record.value("cumulative_delta"), Some(Decimal::ZERO));
    }

    #[test]
    fn test_from_values() {
        let values = SymbolValues::default()
            .with_metric("funding_rate", dec!(0.0001))
            .with_signal("positive");
        let now = Utc::now();

        let record = SnapshotRecord::from_values("funding", "BTCUSDT", now, Some(now), &values);

        assert_eq!(record.value("funding_rate"), Some(dec!(0.0001)));
        assert_eq!(record.signal.as_deref(), Some("positive"));
        assert_eq!(record.captured_at, now);
    }
}
