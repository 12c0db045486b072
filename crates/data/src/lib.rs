//! Snapshot persistence for the order-flow indicator service.
//!
//! This crate provides:
//! - [`SnapshotRecord`], the persisted shape shared by every module
//! - The [`SnapshotStore`] trait with Postgres and in-memory backends
//! - [`flush_snapshots`], which writes the current and history views

pub mod database;
pub mod models;
pub mod persistence;
pub mod repositories;
pub mod store;

pub use database::connect_pool;
pub use models::SnapshotRecord;
pub use persistence::{flush_snapshots, SnapshotPersistence};
pub use repositories::PgSnapshotStore;
pub use store::{MemorySnapshotStore, SharedSnapshotStore, SnapshotStore};
