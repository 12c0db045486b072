use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

/// Opens a `PostgreSQL` connection pool.
///
/// # Errors
/// Returns an error if the database connection cannot be established.
pub async fn connect_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to snapshot database")?;
    info!(max_connections, "Connected to snapshot database");
    Ok(pool)
}
