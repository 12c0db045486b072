//! CLI commands for the order-flow indicator service.

pub mod run;
pub mod self_test;

pub use run::{run_service, RunArgs};
pub use self_test::{run_self_test, SelfTestArgs};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use orderflow_core::{AppConfig, ConfigLoader, SystemClock};
use orderflow_data::{connect_pool, MemorySnapshotStore, PgSnapshotStore, SharedSnapshotStore};
use orderflow_signals::{BinanceMetadataClient, ModuleContext};

/// Loads configuration from `path`, defaults and `ORDERFLOW_*` variables.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let config = ConfigLoader::load_from(path)?;
    tracing::info!(
        symbols = ?config.normalized_symbols(),
        modules = ?config.modules,
        flush_interval_secs = config.persistence.flush_interval_secs,
        "Configuration loaded"
    );
    Ok(config)
}

/// Chooses the snapshot store: PostgreSQL when a URL is configured,
/// in-memory otherwise.
pub async fn build_store(config: &AppConfig) -> Result<SharedSnapshotStore> {
    match &config.persistence.database_url {
        Some(url) => {
            let pool = connect_pool(url, config.persistence.max_connections).await?;
            let store = PgSnapshotStore::new(pool);
            store
                .ensure_schema()
                .await
                .context("Failed to prepare snapshot tables")?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No database_url configured, snapshots are kept in memory only");
            Ok(Arc::new(MemorySnapshotStore::new()))
        }
    }
}

/// Builds the shared module context.
pub async fn build_context(config: AppConfig) -> Result<ModuleContext> {
    let store = build_store(&config).await?;
    let metadata = BinanceMetadataClient::new(&config.metadata)
        .context("Failed to build metadata client")?;

    Ok(ModuleContext::new(
        config,
        Arc::new(metadata),
        store,
        Arc::new(SystemClock),
    ))
}
