//! Flushing module snapshots to a store.
//!
//! A flush writes the same record set to both views. The two writes are
//! independent: a failed upsert does not stop the history append, and vice
//! versa. Either failure is reported as [`PersistError::Partial`] so the
//! caller keeps its in-memory state for the next flush.

use orderflow_core::PersistError;
use tracing::{debug, warn};

use crate::models::SnapshotRecord;
use crate::store::{SharedSnapshotStore, SnapshotStore};

/// Writes records to the current and history views.
///
/// An empty record set is a no-op and touches neither view.
///
/// # Errors
/// Returns [`PersistError::Partial`] naming each view whose write failed.
pub async fn flush_snapshots(
    store: &dyn SnapshotStore,
    records: &[SnapshotRecord],
) -> Result<(), PersistError> {
    if records.is_empty() {
        return Ok(());
    }

    let upsert = store.upsert_current(records).await.err();
    let append = store.append_history(records).await.err();

    if upsert.is_none() && append.is_none() {
        debug!(records = records.len(), "Flushed snapshots");
        return Ok(());
    }

    if let Some(e) = &upsert {
        warn!(error = %e, records = records.len(), "Current snapshot upsert failed");
    }
    if let Some(e) = &append {
        warn!(error = %e, records = records.len(), "History append failed");
    }

    Err(PersistError::Partial {
        upsert: upsert.map(|e| e.to_string()),
        append: append.map(|e| e.to_string()),
    })
}

/// Store handle owned by a module for its `save` step.
#[derive(Clone)]
pub struct SnapshotPersistence {
    store: SharedSnapshotStore,
}

impl SnapshotPersistence {
    #[must_use]
    pub fn new(store: SharedSnapshotStore) -> Self {
        Self { store }
    }

    /// Flushes a record set; see [`flush_snapshots`].
    ///
    /// # Errors
    /// Returns [`PersistError::Partial`] if either view failed.
    pub async fn flush(&self, records: &[SnapshotRecord]) -> Result<(), PersistError> {
        flush_snapshots(self.store.as_ref(), records).await
    }
}

impl std::fmt::Debug for SnapshotPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPersistence").finish_non_exhaustive()
    }
}
