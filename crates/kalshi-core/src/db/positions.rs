//! Database operations for positions.

use crate::types::{Position, PositionStats, PositionStatus, Side, StrategyKind};
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Repository for position data.
pub struct PositionRepository {
    pool: PgPool,
}

impl PositionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new position.
    pub async fn insert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, ticker, side, entry_price_cents, quantity, capital_committed,
                opened_at, status, closed_at, exit_price_cents, realized_pnl,
                strategy, rationale, last_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(position.id)
        .bind(&position.ticker)
        .bind(position.side.as_str())
        .bind(position.entry_price_cents)
        .bind(position.quantity)
        .bind(position.capital_committed)
        .bind(position.opened_at)
        .bind(status_to_i16(position.status))
        .bind(position.closed_at)
        .bind(position.exit_price_cents)
        .bind(position.realized_pnl)
        .bind(position.strategy.as_str())
        .bind(&position.rationale)
        .bind(position.last_updated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update status and settlement fields.
    pub async fn update(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                status = $2,
                closed_at = $3,
                exit_price_cents = $4,
                realized_pnl = $5,
                last_updated = $6
            WHERE id = $1
            "#,
        )
        .bind(position.id)
        .bind(status_to_i16(position.status))
        .bind(position.closed_at)
        .bind(position.exit_price_cents)
        .bind(position.realized_pnl)
        .bind(position.last_updated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a position by ID.
    pub async fn get(&self, id: Uuid) -> Result<Option<Position>> {
        let row = sqlx::query(&select_sql("WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| row_to_position(&r)))
    }

    /// All positions still counting toward committed capital
    /// (Pending and Open).
    pub async fn get_exposed(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&select_sql("WHERE status IN (0, 1) ORDER BY opened_at"))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_position).collect())
    }

    /// Positions stuck in Pending, for crash recovery.
    pub async fn get_pending(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&select_sql("WHERE status = 0 ORDER BY opened_at"))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_position).collect())
    }

    /// Realized PnL summed over positions closed on the given UTC day.
    pub async fn realized_pnl_for_day(&self, day: chrono::NaiveDate) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(realized_pnl), 0) AS pnl
            FROM positions
            WHERE realized_pnl IS NOT NULL AND (closed_at AT TIME ZONE 'UTC')::date = $1
            "#,
        )
        .bind(day)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("pnl"))
    }

    /// Aggregate statistics across all positions.
    pub async fn stats(&self) -> Result<PositionStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status IN (0, 1)) AS open,
                COUNT(*) FILTER (WHERE status IN (2, 3, 4, 5)) AS closed,
                COALESCE(SUM(realized_pnl), 0) AS pnl,
                COUNT(*) FILTER (WHERE realized_pnl > 0) AS wins,
                COUNT(*) FILTER (WHERE realized_pnl < 0) AS losses
            FROM positions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(PositionStats {
            total_positions: row.get::<i64, _>("total") as u64,
            open_positions: row.get::<i64, _>("open") as u64,
            closed_positions: row.get::<i64, _>("closed") as u64,
            total_realized_pnl: row.get("pnl"),
            win_count: row.get::<i64, _>("wins") as u64,
            loss_count: row.get::<i64, _>("losses") as u64,
        })
    }
}

fn select_sql(where_clause: &str) -> String {
    format!(
        r#"
        SELECT
            id, ticker, side, entry_price_cents, quantity, capital_committed,
            opened_at, status, closed_at, exit_price_cents, realized_pnl,
            strategy, rationale, last_updated
        FROM positions
        {where_clause}
        "#
    )
}

fn status_to_i16(status: PositionStatus) -> i16 {
    match status {
        PositionStatus::Pending => 0,
        PositionStatus::Open => 1,
        PositionStatus::ClosedTakeProfit => 2,
        PositionStatus::ClosedStopLoss => 3,
        PositionStatus::ClosedExpired => 4,
        PositionStatus::ClosedManual => 5,
        PositionStatus::EntryFailed => 6,
    }
}

/// Convert a database row to a Position.
fn row_to_position(r: &sqlx::postgres::PgRow) -> Position {
    let opened_at: DateTime<Utc> = r.get("opened_at");
    let last_updated = r
        .get::<Option<DateTime<Utc>>, _>("last_updated")
        .unwrap_or(opened_at);

    Position {
        id: r.get("id"),
        ticker: r.get("ticker"),
        side: match r.get::<String, _>("side").as_str() {
            "no" => Side::No,
            _ => Side::Yes,
        },
        entry_price_cents: r.get("entry_price_cents"),
        quantity: r.get("quantity"),
        capital_committed: r.get("capital_committed"),
        opened_at,
        status: match r.get::<i16, _>("status") {
            0 => PositionStatus::Pending,
            1 => PositionStatus::Open,
            2 => PositionStatus::ClosedTakeProfit,
            3 => PositionStatus::ClosedStopLoss,
            4 => PositionStatus::ClosedExpired,
            5 => PositionStatus::ClosedManual,
            _ => PositionStatus::EntryFailed,
        },
        closed_at: r.get("closed_at"),
        exit_price_cents: r.get("exit_price_cents"),
        realized_pnl: r.get("realized_pnl"),
        strategy: match r.get::<String, _>("strategy").as_str() {
            "weather" => StrategyKind::Weather,
            _ => StrategyKind::VolEdge,
        },
        rationale: r.get("rationale"),
        last_updated,
    }
}
