//! Check-then-commit capital ledger.
//!
//! Every entry reserves its capital atomically under one lock: the checks
//! and the commit happen in the same critical section, so two concurrent
//! entries can never both pass against the same remaining headroom. The
//! committed total is in-memory only; on restart it is re-derived from
//! exposed positions, never trusted from a stored counter.

use chrono::{NaiveDate, Utc};
use kalshi_core::config::RiskConfig;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Why an entry was refused capital.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Single trade larger than the per-trade cap.
    ExceedsPerTradeCap,
    /// Reservation would push committed capital over the total ceiling.
    ExceedsTotalExposure,
    /// Daily realized-loss limit tripped; entries halted until the next
    /// UTC day.
    DailyLossLimitReached,
    /// Entries halted for another reason, e.g. a ledger divergence found
    /// by reconciliation.
    EntriesHalted,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::ExceedsPerTradeCap => write!(f, "exceeds per-trade cap"),
            RejectReason::ExceedsTotalExposure => write!(f, "exceeds total exposure ceiling"),
            RejectReason::DailyLossLimitReached => write!(f, "daily loss limit reached"),
            RejectReason::EntriesHalted => write!(f, "entries halted"),
        }
    }
}

/// Outcome of an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Capital reserved; the caller must later `release` or `rollback`
    /// exactly this amount.
    Approved { capital: Decimal },
    Rejected(RejectReason),
}

impl Authorization {
    pub fn is_approved(&self) -> bool {
        matches!(self, Authorization::Approved { .. })
    }
}

/// Point-in-time view of the ledger, for logging and status reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LedgerSnapshot {
    pub committed: Decimal,
    pub available: Decimal,
    pub realized_pnl_today: Decimal,
    pub entries_halted: bool,
    pub day: NaiveDate,
}

#[derive(Debug)]
struct LedgerState {
    committed: Decimal,
    realized_pnl_today: Decimal,
    day: NaiveDate,
}

/// The guardrail itself. One instance is shared by all strategies so the
/// exposure ceiling is global, not per-strategy.
pub struct RiskGuardrail {
    limits: RiskConfig,
    state: Mutex<LedgerState>,
    /// Fast-path halt flag mirrored from the locked state.
    entries_halted: AtomicBool,
}

impl RiskGuardrail {
    pub fn new(limits: RiskConfig) -> Self {
        Self {
            limits,
            state: Mutex::new(LedgerState {
                committed: Decimal::ZERO,
                realized_pnl_today: Decimal::ZERO,
                day: Utc::now().date_naive(),
            }),
            entries_halted: AtomicBool::new(false),
        }
    }

    /// Whether new entries are currently halted. Exits are never halted.
    pub fn entries_halted(&self) -> bool {
        self.entries_halted.load(Ordering::Relaxed)
    }

    /// Reserve capital for one entry. Checks and commit are atomic.
    pub async fn authorize(&self, capital: Decimal) -> Authorization {
        let mut state = self.state.lock().await;
        self.roll_day(&mut state);

        if self.entries_halted.load(Ordering::Relaxed) {
            let reason = if state.realized_pnl_today <= -self.limits.daily_loss_limit {
                RejectReason::DailyLossLimitReached
            } else {
                RejectReason::EntriesHalted
            };
            return Authorization::Rejected(reason);
        }
        if capital > self.limits.per_trade_cap {
            return Authorization::Rejected(RejectReason::ExceedsPerTradeCap);
        }
        if state.committed + capital > self.limits.total_capital {
            return Authorization::Rejected(RejectReason::ExceedsTotalExposure);
        }

        state.committed += capital;
        Authorization::Approved { capital }
    }

    /// Return a reservation whose entry never executed. No PnL is recorded.
    pub async fn rollback(&self, capital: Decimal) {
        let mut state = self.state.lock().await;
        state.committed -= capital;
        if state.committed < Decimal::ZERO {
            error!(committed = %state.committed, "ledger went negative on rollback, clamping");
            state.committed = Decimal::ZERO;
        }
    }

    /// Release a closed position's capital and record its realized PnL.
    /// Trips the daily halt when today's realized loss reaches the limit.
    pub async fn release(&self, capital: Decimal, realized_pnl: Decimal) {
        let mut state = self.state.lock().await;
        self.roll_day(&mut state);

        state.committed -= capital;
        if state.committed < Decimal::ZERO {
            error!(committed = %state.committed, "ledger went negative on release, clamping");
            state.committed = Decimal::ZERO;
        }
        state.realized_pnl_today += realized_pnl;

        if state.realized_pnl_today <= -self.limits.daily_loss_limit
            && !self.entries_halted.swap(true, Ordering::Relaxed)
        {
            warn!(
                realized_pnl_today = %state.realized_pnl_today,
                limit = %self.limits.daily_loss_limit,
                "daily loss limit reached, halting new entries until next UTC day"
            );
        }
    }

    /// Seed the ledger from durable state at startup: committed capital
    /// derived from exposed positions, plus today's realized PnL and halt
    /// flag from the day's ledger row.
    pub async fn restore(
        &self,
        derived_committed: Decimal,
        realized_pnl_today: Decimal,
        entries_halted: bool,
    ) {
        let mut state = self.state.lock().await;
        state.committed = derived_committed;
        state.realized_pnl_today = realized_pnl_today;
        state.day = Utc::now().date_naive();
        self.entries_halted.store(
            entries_halted || realized_pnl_today <= -self.limits.daily_loss_limit,
            Ordering::Relaxed,
        );
        info!(
            committed = %derived_committed,
            realized_pnl_today = %realized_pnl_today,
            halted = self.entries_halted.load(Ordering::Relaxed),
            "risk ledger restored"
        );
    }

    /// Cross-check the in-memory committed total against the sum derived
    /// from exposed positions. On divergence the derived value wins and new
    /// entries halt until an operator investigates.
    pub async fn reconcile(&self, derived_committed: Decimal) -> bool {
        let mut state = self.state.lock().await;
        if state.committed == derived_committed {
            return true;
        }
        error!(
            ledger = %state.committed,
            derived = %derived_committed,
            "committed capital diverged from positions, halting entries"
        );
        state.committed = derived_committed;
        self.entries_halted.store(true, Ordering::Relaxed);
        false
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        let mut state = self.state.lock().await;
        self.roll_day(&mut state);
        LedgerSnapshot {
            committed: state.committed,
            available: self.limits.total_capital - state.committed,
            realized_pnl_today: state.realized_pnl_today,
            entries_halted: self.entries_halted.load(Ordering::Relaxed),
            day: state.day,
        }
    }

    /// Reset the daily counters when the UTC date changes. Committed
    /// capital carries across days; only the loss counter and halt reset.
    fn roll_day(&self, state: &mut LedgerState) {
        let today = Utc::now().date_naive();
        if state.day != today {
            info!(from = %state.day, to = %today, "UTC day rolled, daily loss counter reset");
            state.day = today;
            state.realized_pnl_today = Decimal::ZERO;
            self.entries_halted.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RiskConfig {
        RiskConfig {
            per_trade_cap: Decimal::new(100, 2),      // $1.00
            total_capital: Decimal::new(100_000, 2),  // $1000.00
            daily_loss_limit: Decimal::new(5_000, 2), // $50.00
        }
    }

    fn dollars(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[tokio::test]
    async fn approves_within_caps() {
        let guard = RiskGuardrail::new(limits());
        assert!(guard.authorize(dollars(100)).await.is_approved());
        let snap = guard.snapshot().await;
        assert_eq!(snap.committed, dollars(100));
        assert_eq!(snap.available, dollars(99_900));
    }

    #[tokio::test]
    async fn per_trade_cap_is_exact() {
        let guard = RiskGuardrail::new(limits());
        // $1.00 passes, $1.01 does not, and a rejection leaves no trace
        assert!(guard.authorize(dollars(100)).await.is_approved());
        assert_eq!(
            guard.authorize(dollars(101)).await,
            Authorization::Rejected(RejectReason::ExceedsPerTradeCap)
        );
        assert_eq!(guard.snapshot().await.committed, dollars(100));
    }

    #[tokio::test]
    async fn exposure_ceiling_counts_existing_reservations() {
        let guard = RiskGuardrail::new(RiskConfig {
            per_trade_cap: dollars(100),
            total_capital: dollars(250),
            daily_loss_limit: dollars(5_000),
        });
        assert!(guard.authorize(dollars(100)).await.is_approved());
        assert!(guard.authorize(dollars(100)).await.is_approved());
        assert_eq!(
            guard.authorize(dollars(51)).await,
            Authorization::Rejected(RejectReason::ExceedsTotalExposure)
        );
        // exactly filling the ceiling is fine
        assert!(guard.authorize(dollars(50)).await.is_approved());
    }

    #[tokio::test]
    async fn rollback_restores_headroom() {
        let guard = RiskGuardrail::new(limits());
        assert!(guard.authorize(dollars(100)).await.is_approved());
        guard.rollback(dollars(100)).await;
        assert_eq!(guard.snapshot().await.committed, Decimal::ZERO);
    }

    #[tokio::test]
    async fn daily_loss_halts_entries_but_not_exits() {
        let guard = RiskGuardrail::new(limits());
        assert!(guard.authorize(dollars(100)).await.is_approved());
        // realize a $50 loss: limit reached
        guard.release(dollars(100), dollars(-5_000)).await;
        assert!(guard.entries_halted());
        assert_eq!(
            guard.authorize(dollars(10)).await,
            Authorization::Rejected(RejectReason::DailyLossLimitReached)
        );
        // releases still work while halted
        guard.release(Decimal::ZERO, dollars(100)).await;
    }

    #[tokio::test]
    async fn losses_accumulate_across_positions() {
        let guard = RiskGuardrail::new(limits());
        guard.release(Decimal::ZERO, dollars(-3_000)).await;
        assert!(!guard.entries_halted());
        guard.release(Decimal::ZERO, dollars(-2_000)).await;
        assert!(guard.entries_halted());
    }

    #[tokio::test]
    async fn profits_offset_losses() {
        let guard = RiskGuardrail::new(limits());
        guard.release(Decimal::ZERO, dollars(-3_000)).await;
        guard.release(Decimal::ZERO, dollars(2_000)).await;
        guard.release(Decimal::ZERO, dollars(-3_500)).await;
        // net -$45, under the $50 limit
        assert!(!guard.entries_halted());
    }

    #[tokio::test]
    async fn restore_seeds_ledger_and_halt() {
        let guard = RiskGuardrail::new(limits());
        guard.restore(dollars(300), dollars(-6_000), false).await;
        assert!(guard.entries_halted());
        let snap = guard.snapshot().await;
        assert_eq!(snap.committed, dollars(300));
    }

    #[tokio::test]
    async fn reconcile_adopts_derived_value_and_halts() {
        let guard = RiskGuardrail::new(limits());
        assert!(guard.authorize(dollars(100)).await.is_approved());
        assert!(guard.reconcile(dollars(100)).await);
        assert!(!guard.entries_halted());

        assert!(!guard.reconcile(dollars(200)).await);
        assert!(guard.entries_halted());
        assert_eq!(guard.snapshot().await.committed, dollars(200));
        // halted for divergence, not for losses
        assert_eq!(
            guard.authorize(dollars(10)).await,
            Authorization::Rejected(RejectReason::EntriesHalted)
        );
    }

    #[tokio::test]
    async fn concurrent_entries_never_overshoot() {
        use std::sync::Arc;

        let guard = Arc::new(RiskGuardrail::new(RiskConfig {
            per_trade_cap: dollars(100),
            total_capital: dollars(500),
            daily_loss_limit: dollars(5_000),
        }));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let g = Arc::clone(&guard);
            handles.push(tokio::spawn(
                async move { g.authorize(dollars(100)).await },
            ));
        }

        let mut approved = 0;
        for h in handles {
            if h.await.unwrap().is_approved() {
                approved += 1;
            }
        }
        assert_eq!(approved, 5);
        assert_eq!(guard.snapshot().await.committed, dollars(500));
    }
}
