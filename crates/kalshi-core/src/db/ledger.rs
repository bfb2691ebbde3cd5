//! Persistence for the daily risk ledger.
//!
//! Committed capital is never stored; it is re-derived from exposed
//! positions on startup. Only the per-day realized loss and halt flag are
//! durable here so a restart cannot forget that the daily limit tripped.

use crate::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone, Copy)]
pub struct LedgerDay {
    pub day: NaiveDate,
    pub realized_pnl: Decimal,
    pub entries_halted: bool,
}

/// Repository for per-day risk ledger rows.
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the ledger row for a day.
    pub async fn save(&self, day: &LedgerDay) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_days (day, realized_pnl, entries_halted)
            VALUES ($1, $2, $3)
            ON CONFLICT (day) DO UPDATE SET
                realized_pnl = EXCLUDED.realized_pnl,
                entries_halted = EXCLUDED.entries_halted
            "#,
        )
        .bind(day.day)
        .bind(day.realized_pnl)
        .bind(day.entries_halted)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, day: NaiveDate) -> Result<Option<LedgerDay>> {
        let row = sqlx::query(
            "SELECT day, realized_pnl, entries_halted FROM ledger_days WHERE day = $1",
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| LedgerDay {
            day: r.get("day"),
            realized_pnl: r.get("realized_pnl"),
            entries_halted: r.get("entries_halted"),
        }))
    }
}
