//! Data models for persisted indicator state.

pub mod snapshot;

pub use snapshot::SnapshotRecord;
