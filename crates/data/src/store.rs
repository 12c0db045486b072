//! Snapshot store abstraction.
//!
//! A store keeps two views of module state:
//! - `current`: one row per (module, symbol), overwritten on every flush
//! - `history`: append-only, one row per flush per symbol
//!
//! [`MemorySnapshotStore`] backs tests and database-less runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use orderflow_core::PersistError;
use parking_lot::Mutex;

use crate::models::SnapshotRecord;

/// Durable destination for indicator snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replaces the current row for each (module, symbol) in `records`.
    async fn upsert_current(&self, records: &[SnapshotRecord]) -> Result<(), PersistError>;

    /// Appends every record to history.
    async fn append_history(&self, records: &[SnapshotRecord]) -> Result<(), PersistError>;
}

/// Shared store handle.
pub type SharedSnapshotStore = Arc<dyn SnapshotStore>;

/// In-memory store with failure injection.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    current: HashMap<(String, String), SnapshotRecord>,
    history: Vec<SnapshotRecord>,
    fail_upsert: bool,
    fail_append: bool,
    upsert_calls: usize,
    append_calls: usize,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent upserts fail.
    pub fn set_fail_upsert(&self, fail: bool) {
        self.inner.lock().fail_upsert = fail;
    }

    /// Makes subsequent history appends fail.
    pub fn set_fail_append(&self, fail: bool) {
        self.inner.lock().fail_append = fail;
    }

    /// Current row for a (module, symbol) pair.
    #[must_use]
    pub fn current(&self, module: &str, symbol: &str) -> Option<SnapshotRecord> {
        self.inner
            .lock()
            .current
            .get(&(module.to_string(), symbol.to_string()))
            .cloned()
    }

    /// Number of rows in the current view.
    #[must_use]
    pub fn current_len(&self) -> usize {
        self.inner.lock().current.len()
    }

    /// Full history in append order.
    #[must_use]
    pub fn history(&self) -> Vec<SnapshotRecord> {
        self.inner.lock().history.clone()
    }

    /// History rows for one (module, symbol) pair, oldest first.
    #[must_use]
    pub fn history_for(&self, module: &str, symbol: &str) -> Vec<SnapshotRecord> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|r| r.module == module && r.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Number of upsert and append calls received, including failed ones.
    #[must_use]
    pub fn call_counts(&self) -> (usize, usize) {
        let state = self.inner.lock();
        (state.upsert_calls, state.append_calls)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn upsert_current(&self, records: &[SnapshotRecord]) -> Result<(), PersistError> {
        let mut state = self.inner.lock();
        state.upsert_calls += 1;
        if state.fail_upsert {
            return Err(PersistError::Store("injected upsert failure".to_string()));
        }
        for record in records {
            state.current.insert(record.key(), record.clone());
        }
        Ok(())
    }

    async fn append_history(&self, records: &[SnapshotRecord]) -> Result<(), PersistError> {
        let mut state = self.inner.lock();
        state.append_calls += 1;
        if state.fail_append {
            return Err(PersistError::Store("injected append failure".to_string()));
        }
        state.history.extend(records.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orderflow_core::SymbolValues;
    use rust_decimal_macros::dec;

    fn record(symbol: &str, delta: rust_decimal::Decimal) -> SnapshotRecord {
        let values = SymbolValues::default().with_metric("cumulative_delta", delta);
        SnapshotRecord::from_values("cvd", symbol, Utc::now(), None, &values)
    }

    #[tokio::test]
    async fn test_upsert_overwrites_current() {
        let store = MemorySnapshotStore::new();

        store
            .upsert_current(&[record("BTCUSDT", dec!(1))])
            .await
            .unwrap();
        store
            .upsert_current(&[record("BTCUSDT", dec!(2))])
            .await
            .unwrap();

        assert_eq!(store.current_len(), 1);
        let row = store.current("cvd", "BTCUSDT").unwrap();
        assert_eq!(row.value("cumulative_delta"), Some(dec!(2)));
    }

    #[tokio::test]
    async fn test_append_keeps_every_row() {
        let store = MemorySnapshotStore::new();

        store
            .append_history(&[record("BTCUSDT", dec!(1)), record("ETHUSDT", dec!(3))])
            .await
            .unwrap();
        store
            .append_history(&[record("BTCUSDT", dec!(2))])
            .await
            .unwrap();

        assert_eq!(store.history().len(), 3);
        assert_eq!(store.history_for("cvd", "BTCUSDT").len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemorySnapshotStore::new();
        store.set_fail_upsert(true);

        assert!(store
            .upsert_current(&[record("BTCUSDT", dec!(1))])
            .await
            .is_err());
        assert!(store
            .append_history(&[record("BTCUSDT", dec!(1))])
            .await
            .is_ok());

        assert_eq!(store.current_len(), 0);
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.call_counts(), (1, 1));
    }
}
