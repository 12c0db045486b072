//! Indicator snapshot repository.
//!
//! `indicator_current` holds the latest row per (module, symbol) and is
//! written with upsert semantics. `indicator_history` is append-only.
//! Named values are stored as JSONB.

use anyhow::Result;
use async_trait::async_trait;
use orderflow_core::PersistError;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::SnapshotRecord;
use crate::store::SnapshotStore;

/// Postgres-backed snapshot store.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates both tables if they do not exist.
    ///
    /// # Errors
    /// Returns an error if a DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS indicator_current (
                module TEXT NOT NULL,
                symbol TEXT NOT NULL,
                captured_at TIMESTAMPTZ NOT NULL,
                last_update_time TIMESTAMPTZ,
                metric_values JSONB NOT NULL,
                signal TEXT,
                PRIMARY KEY (module, symbol)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS indicator_history (
                id BIGSERIAL PRIMARY KEY,
                module TEXT NOT NULL,
                symbol TEXT NOT NULL,
                captured_at TIMESTAMPTZ NOT NULL,
                last_update_time TIMESTAMPTZ,
                metric_values JSONB NOT NULL,
                signal TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_indicator_history_key_time
                ON indicator_history (module, symbol, captured_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_batch(&self, records: &[SnapshotRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO indicator_current
                    (module, symbol, captured_at, last_update_time, metric_values, signal)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (module, symbol)
                DO UPDATE SET
                    captured_at = EXCLUDED.captured_at,
                    last_update_time = EXCLUDED.last_update_time,
                    metric_values = EXCLUDED.metric_values,
                    signal = EXCLUDED.signal
                "#,
            )
            .bind(&record.module)
            .bind(&record.symbol)
            .bind(record.captured_at)
            .bind(record.last_update_time)
            .bind(Json(&record.values))
            .bind(&record.signal)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append_batch(&self, records: &[SnapshotRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO indicator_history
                    (module, symbol, captured_at, last_update_time, metric_values, signal)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&record.module)
            .bind(&record.symbol)
            .bind(record.captured_at)
            .bind(record.last_update_time)
            .bind(Json(&record.values))
            .bind(&record.signal)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn upsert_current(&self, records: &[SnapshotRecord]) -> Result<(), PersistError> {
        if records.is_empty() {
            return Ok(());
        }
        self.upsert_batch(records)
            .await
            .map_err(|e| PersistError::Store(format!("{e:#}")))
    }

    async fn append_history(&self, records: &[SnapshotRecord]) -> Result<(), PersistError> {
        if records.is_empty() {
            return Ok(());
        }
        self.append_batch(records)
            .await
            .map_err(|e| PersistError::Store(format!("{e:#}")))
    }
}
