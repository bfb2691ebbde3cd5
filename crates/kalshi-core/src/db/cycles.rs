//! Audit log of execution cycles.

use crate::types::CycleRecord;
use crate::Result;
use sqlx::PgPool;

/// Repository for cycle audit records.
pub struct CycleRepository {
    pool: PgPool,
}

impl CycleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a finished cycle. Skips and errors are stored as JSON arrays.
    pub async fn insert(&self, cycle: &CycleRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cycles (
                id, strategy, started_at, finished_at, markets_evaluated,
                signals_received, trades_opened, positions_closed, skips, errors
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(cycle.id)
        .bind(cycle.strategy.as_str())
        .bind(cycle.started_at)
        .bind(cycle.finished_at)
        .bind(cycle.markets_evaluated as i32)
        .bind(cycle.signals_received as i32)
        .bind(cycle.trades_opened as i32)
        .bind(cycle.positions_closed as i32)
        .bind(serde_json::to_value(&cycle.skips)?)
        .bind(serde_json::to_value(&cycle.errors)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
