//! Database repositories for indicator snapshots.

pub mod snapshot_repo;

pub use snapshot_repo::PgSnapshotStore;
