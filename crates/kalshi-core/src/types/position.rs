//! Position lifecycle state machine.
//!
//! Positions are owned by the position manager, created on guardrail-approved
//! execution and mutated only through the transition methods here. Closed
//! positions are retained for audit and PnL history, never deleted.

use crate::types::{MarketResult, Side, StrategyKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Created on guardrail approval, awaiting execution confirmation.
    Pending,
    /// Execution confirmed, actively monitored for exit conditions.
    Open,
    ClosedTakeProfit,
    ClosedStopLoss,
    /// Expired on the exchange; PnL settled at terminal settlement value.
    ClosedExpired,
    /// Operator override close.
    ClosedManual,
    /// Execution failed; the capital reservation was rolled back and the row
    /// is retained for audit only.
    EntryFailed,
}

impl PositionStatus {
    /// Positions counting toward committed capital.
    pub fn is_exposed(&self) -> bool {
        matches!(self, PositionStatus::Pending | PositionStatus::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            PositionStatus::ClosedTakeProfit
                | PositionStatus::ClosedStopLoss
                | PositionStatus::ClosedExpired
                | PositionStatus::ClosedManual
        )
    }
}

/// Exit condition that closed a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    TakeProfit,
    StopLoss,
    Expired,
    Manual,
}

impl ExitKind {
    pub fn status(&self) -> PositionStatus {
        match self {
            ExitKind::TakeProfit => PositionStatus::ClosedTakeProfit,
            ExitKind::StopLoss => PositionStatus::ClosedStopLoss,
            ExitKind::Expired => PositionStatus::ClosedExpired,
            ExitKind::Manual => PositionStatus::ClosedManual,
        }
    }
}

/// A held contract quantity with tracked entry price and lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub ticker: String,
    pub side: Side,
    /// Entry price in cents.
    pub entry_price_cents: i64,
    pub quantity: i64,
    /// Dollars reserved against the risk ledger for this position.
    pub capital_committed: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub closed_at: Option<DateTime<Utc>>,
    /// Exit price in cents (settlement value for expired positions).
    pub exit_price_cents: Option<i64>,
    pub realized_pnl: Option<Decimal>,
    pub strategy: StrategyKind,
    /// Why the trade was entered, for the audit trail.
    pub rationale: String,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// Create a new pending position. Capital is exact: price * quantity.
    pub fn new(
        ticker: String,
        side: Side,
        entry_price_cents: i64,
        quantity: i64,
        strategy: StrategyKind,
        rationale: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ticker,
            side,
            entry_price_cents,
            quantity,
            capital_committed: Decimal::new(entry_price_cents * quantity, 2),
            opened_at: now,
            status: PositionStatus::Pending,
            closed_at: None,
            exit_price_cents: None,
            realized_pnl: None,
            strategy,
            rationale,
            last_updated: now,
        }
    }

    /// Mark the position open after execution confirmation.
    /// Only valid from Pending.
    pub fn mark_open(&mut self) -> std::result::Result<(), String> {
        if self.status != PositionStatus::Pending {
            return Err(format!(
                "cannot transition to Open from {:?} (expected Pending)",
                self.status
            ));
        }
        self.status = PositionStatus::Open;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Mark execution as failed. The guardrail reservation must be rolled
    /// back by the caller; this position never counted as committed.
    pub fn mark_entry_failed(&mut self) -> std::result::Result<(), String> {
        if self.status != PositionStatus::Pending {
            return Err(format!(
                "cannot transition to EntryFailed from {:?} (expected Pending)",
                self.status
            ));
        }
        self.status = PositionStatus::EntryFailed;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Close the position at the given exit price. Only valid from Open
    /// (Manual closes are additionally allowed from Pending during recovery).
    /// Returns the realized PnL, which is exact in integer cents.
    pub fn close(
        &mut self,
        kind: ExitKind,
        exit_price_cents: i64,
    ) -> std::result::Result<Decimal, String> {
        let from_pending = self.status == PositionStatus::Pending && kind == ExitKind::Manual;
        if self.status != PositionStatus::Open && !from_pending {
            return Err(format!("cannot close from {:?}", self.status));
        }

        let pnl = Decimal::new((exit_price_cents - self.entry_price_cents) * self.quantity, 2);
        self.status = kind.status();
        self.exit_price_cents = Some(exit_price_cents);
        self.realized_pnl = Some(pnl);
        self.closed_at = Some(Utc::now());
        self.last_updated = Utc::now();
        Ok(pnl)
    }

    /// Close an expired position at the exchange's terminal settlement value,
    /// not a market exit price.
    pub fn settle(&mut self, result: MarketResult) -> std::result::Result<Decimal, String> {
        let settlement = self.side.settlement_cents(result);
        self.close(ExitKind::Expired, settlement)
    }

    /// Unrealized loss as a fraction of entry, given the current exit value.
    /// Negative values mean the position is in profit.
    pub fn unrealized_loss_pct(&self, current_bid_cents: i64) -> f64 {
        if self.entry_price_cents <= 0 {
            return 0.0;
        }
        (self.entry_price_cents - current_bid_cents) as f64 / self.entry_price_cents as f64
    }
}

/// Summary statistics over closed positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionStats {
    pub total_positions: u64,
    pub open_positions: u64,
    pub closed_positions: u64,
    pub total_realized_pnl: Decimal,
    pub win_count: u64,
    pub loss_count: u64,
}

impl PositionStats {
    pub fn win_rate(&self) -> Option<f64> {
        let total = self.win_count + self.loss_count;
        if total == 0 {
            None
        } else {
            Some(self.win_count as f64 / total as f64)
        }
    }
}
