//! Position lifecycle management.
//!
//! Owns every position from guardrail authorization to close. Entries are
//! two-phase: reserve capital, persist a Pending row, execute, then either
//! confirm Open or roll the reservation back. Exits release capital and
//! record realized PnL against the daily ledger.

use crate::executor::ExecutionSink;
use crate::exit_rules::{self, ExitDecision};
use dashmap::DashMap;
use chrono::Utc;
use kalshi_core::api::{ExchangePosition, MarketCatalog};
use kalshi_core::config::EngineConfig;
use kalshi_core::db::ledger::{LedgerDay, LedgerRepository};
use kalshi_core::db::positions::PositionRepository;
use kalshi_core::types::{ExitKind, Position, ProbabilityModel, TradePlan};
use kalshi_core::{Error, Result};
use risk_manager::{Authorization, RejectReason, RiskGuardrail};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of attempting to open a position from a trade plan.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Opened(Uuid),
    /// The guardrail refused capital. Not an error; the plan is dropped.
    RiskRejected(RejectReason),
    /// Capital was reserved but execution failed; the reservation was
    /// rolled back.
    ExecutionFailed(String),
}

/// Outcome of one exit sweep.
#[derive(Debug, Default)]
pub struct ExitSummary {
    pub closed: u32,
    pub errors: Vec<String>,
}

/// Tracks all positions and drives their lifecycle.
pub struct PositionManager {
    positions: DashMap<Uuid, Position>,
    guardrail: Arc<RiskGuardrail>,
    repo: Option<Arc<PositionRepository>>,
    ledger_repo: Option<Arc<LedgerRepository>>,
}

impl PositionManager {
    /// In-memory manager without persistence (paper runs, tests).
    pub fn new(guardrail: Arc<RiskGuardrail>) -> Self {
        Self {
            positions: DashMap::new(),
            guardrail,
            repo: None,
            ledger_repo: None,
        }
    }

    pub fn with_persistence(
        guardrail: Arc<RiskGuardrail>,
        repo: Arc<PositionRepository>,
        ledger_repo: Arc<LedgerRepository>,
    ) -> Self {
        Self {
            positions: DashMap::new(),
            guardrail,
            repo: Some(repo),
            ledger_repo: Some(ledger_repo),
        }
    }

    pub fn guardrail(&self) -> &Arc<RiskGuardrail> {
        &self.guardrail
    }

    /// Tickers with a live (Pending or Open) position. One position per
    /// market at a time.
    pub fn held_tickers(&self) -> HashSet<String> {
        self.positions
            .iter()
            .filter(|p| p.status.is_exposed())
            .map(|p| p.ticker.clone())
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.positions
            .iter()
            .filter(|p| p.status.is_exposed())
            .count()
    }

    pub fn get(&self, id: Uuid) -> Option<Position> {
        self.positions.get(&id).map(|p| p.clone())
    }

    /// Open a position from an approved plan: authorize capital, persist
    /// Pending, execute, confirm or roll back.
    pub async fn open_from_plan(
        &self,
        plan: &TradePlan,
        sink: &dyn ExecutionSink,
    ) -> Result<EntryOutcome> {
        let requested = plan.capital_required();
        let capital = match self.guardrail.authorize(requested).await {
            Authorization::Approved { capital } => capital,
            Authorization::Rejected(reason) => {
                info!(ticker = %plan.ticker, capital = %requested, %reason, "entry rejected by guardrail");
                return Ok(EntryOutcome::RiskRejected(reason));
            }
        };

        let mut position = Position::new(
            plan.ticker.clone(),
            plan.side,
            plan.price_cents,
            plan.quantity,
            plan.strategy,
            plan.rationale.clone(),
        );
        let id = position.id;
        // A position that never became durable must not hold capital.
        if let Err(e) = self.persist_insert(&position).await {
            self.guardrail.rollback(capital).await;
            return Err(e);
        }
        self.positions.insert(id, position.clone());

        match sink
            .place(&plan.ticker, plan.side, plan.price_cents, plan.quantity)
            .await
        {
            Ok(fill) => {
                position.mark_open().map_err(Error::Position)?;
                self.store_and_persist(position).await?;
                info!(
                    ticker = %plan.ticker,
                    side = plan.side.as_str(),
                    price_cents = plan.price_cents,
                    quantity = plan.quantity,
                    order_id = %fill.order_id,
                    %capital,
                    "position opened"
                );
                Ok(EntryOutcome::Opened(id))
            }
            Err(e) => {
                warn!(ticker = %plan.ticker, error = %e, "entry execution failed, rolling back");
                position.mark_entry_failed().map_err(Error::Position)?;
                self.store_and_persist(position).await?;
                self.guardrail.rollback(capital).await;
                Ok(EntryOutcome::ExecutionFailed(e.to_string()))
            }
        }
    }

    /// Sweep all exposed positions against current quotes. A failure on one
    /// position never blocks the rest.
    pub async fn evaluate_exits(
        &self,
        catalog: &dyn MarketCatalog,
        sink: &dyn ExecutionSink,
        model: Option<&dyn ProbabilityModel>,
        cfg: &EngineConfig,
    ) -> ExitSummary {
        let mut summary = ExitSummary::default();
        let exposed: Vec<Position> = self
            .positions
            .iter()
            .filter(|p| p.status.is_exposed())
            .map(|p| p.clone())
            .collect();

        for position in exposed {
            match self.try_exit(&position, catalog, sink, model, cfg).await {
                Ok(true) => summary.closed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(ticker = %position.ticker, error = %e, "exit evaluation failed");
                    summary.errors.push(format!("{}: {e}", position.ticker));
                }
            }
        }
        summary
    }

    async fn try_exit(
        &self,
        position: &Position,
        catalog: &dyn MarketCatalog,
        sink: &dyn ExecutionSink,
        model: Option<&dyn ProbabilityModel>,
        cfg: &EngineConfig,
    ) -> Result<bool> {
        let market = catalog.quote(&position.ticker).await?;
        let Some(decision) = exit_rules::evaluate_exit(position, &market, model, cfg, Utc::now())
        else {
            return Ok(false);
        };

        // Expired contracts settle by themselves; everything else needs a
        // closing order on the book.
        if decision.kind != ExitKind::Expired {
            sink.close(
                &position.ticker,
                position.side,
                position.quantity,
                market.bid_for(position.side),
            )
            .await?;
        }

        self.finalize_close(position.id, &decision).await?;
        Ok(true)
    }

    /// Operator-initiated close at the current bid, regardless of exit
    /// rules. Pending positions are voided without an order.
    pub async fn close_manual(
        &self,
        id: Uuid,
        catalog: &dyn MarketCatalog,
        sink: &dyn ExecutionSink,
    ) -> Result<Decimal> {
        let position = self
            .get(id)
            .ok_or_else(|| Error::Position(format!("unknown position {id}")))?;

        let exit_price_cents = if position.status == kalshi_core::types::PositionStatus::Open {
            let market = catalog.quote(&position.ticker).await?;
            let bid = market.bid_for(position.side);
            sink.close(&position.ticker, position.side, position.quantity, bid)
                .await?;
            bid
        } else {
            // Pending: nothing confirmed on the book, void at entry.
            position.entry_price_cents
        };

        let decision = ExitDecision {
            kind: ExitKind::Manual,
            exit_price_cents,
            reason: "manual close".to_string(),
        };
        self.finalize_close(id, &decision).await
    }

    /// Book the close: state transition, capital release, PnL, persistence.
    async fn finalize_close(&self, id: Uuid, decision: &ExitDecision) -> Result<Decimal> {
        let (position, pnl, capital) = {
            let mut entry = self
                .positions
                .get_mut(&id)
                .ok_or_else(|| Error::Position(format!("unknown position {id}")))?;
            let pnl = entry
                .close(decision.kind, decision.exit_price_cents)
                .map_err(Error::Position)?;
            (entry.clone(), pnl, entry.capital_committed)
        };

        self.guardrail.release(capital, pnl).await;
        self.persist_update(&position).await?;
        self.persist_ledger().await?;

        info!(
            ticker = %position.ticker,
            kind = ?decision.kind,
            exit_price_cents = decision.exit_price_cents,
            %pnl,
            reason = %decision.reason,
            "position closed"
        );
        Ok(pnl)
    }

    /// Rebuild in-memory state after a restart. Committed capital is
    /// re-derived from exposed positions; Pending rows are resolved against
    /// the exchange's own holdings (absent from the exchange means the
    /// entry never filled).
    pub async fn recover(&self, exchange_positions: Option<&[ExchangePosition]>) -> Result<()> {
        let Some(repo) = &self.repo else {
            return Ok(());
        };

        let exposed = repo.get_exposed().await?;
        let today = Utc::now().date_naive();
        let realized_today = repo.realized_pnl_for_day(today).await?;
        let halted = match &self.ledger_repo {
            Some(lr) => lr
                .get(today)
                .await?
                .map(|d| d.entries_halted)
                .unwrap_or(false),
            None => false,
        };
        self.restore_state(exposed, exchange_positions, realized_today, halted)
            .await
    }

    /// Rebuild the in-memory table and risk ledger from recovered rows.
    /// Replay-safe: committed capital is recomputed from the rows, never
    /// accumulated onto the previous value.
    pub async fn restore_state(
        &self,
        exposed: Vec<Position>,
        exchange_positions: Option<&[ExchangePosition]>,
        realized_today: Decimal,
        halted: bool,
    ) -> Result<()> {
        let mut committed = Decimal::ZERO;
        let mut recovered = 0usize;

        for mut position in exposed {
            let on_exchange = exchange_positions.map(|eps| {
                eps.iter()
                    .any(|ep| ep.ticker == position.ticker && ep.position != 0)
            });
            match position.status {
                kalshi_core::types::PositionStatus::Pending => {
                    if on_exchange.unwrap_or(false) {
                        position.mark_open().map_err(Error::Position)?;
                        warn!(ticker = %position.ticker, "pending entry confirmed filled on exchange");
                    } else {
                        position.mark_entry_failed().map_err(Error::Position)?;
                        warn!(ticker = %position.ticker, "pending entry not on exchange, voided");
                    }
                    self.persist_update(&position).await?;
                }
                kalshi_core::types::PositionStatus::Open => {
                    // An open row the exchange no longer holds was closed
                    // out-of-band; book it at entry so it stops holding
                    // capital an operator can no longer free.
                    if on_exchange == Some(false) {
                        position
                            .close(ExitKind::Manual, position.entry_price_cents)
                            .map_err(Error::Position)?;
                        warn!(ticker = %position.ticker, "open row absent on exchange, closed locally");
                        self.persist_update(&position).await?;
                    }
                }
                _ => {}
            }
            if position.status.is_exposed() {
                committed += position.capital_committed;
                recovered += 1;
            }
            self.positions.insert(position.id, position);
        }

        self.guardrail
            .restore(committed, realized_today, halted)
            .await;
        info!(
            positions = recovered,
            %committed,
            %realized_today,
            halted,
            "position state recovered"
        );
        Ok(())
    }

    async fn store_and_persist(&self, position: Position) -> Result<()> {
        self.persist_update(&position).await?;
        self.positions.insert(position.id, position);
        Ok(())
    }

    async fn persist_insert(&self, position: &Position) -> Result<()> {
        if let Some(repo) = &self.repo {
            repo.insert(position).await?;
        }
        Ok(())
    }

    async fn persist_update(&self, position: &Position) -> Result<()> {
        if let Some(repo) = &self.repo {
            repo.update(position).await?;
        }
        Ok(())
    }

    /// Mirror the guardrail's daily counters into the durable ledger row.
    async fn persist_ledger(&self) -> Result<()> {
        if let Some(lr) = &self.ledger_repo {
            let snap = self.guardrail.snapshot().await;
            lr.save(&LedgerDay {
                day: snap.day,
                realized_pnl: snap.realized_pnl_today,
                entries_halted: snap.entries_halted,
            })
            .await?;
        }
        Ok(())
    }

    /// Cross-check committed capital against the positions we actually
    /// hold. Run periodically; a divergence halts entries.
    pub async fn reconcile_ledger(&self) -> bool {
        let derived: Decimal = self
            .positions
            .iter()
            .filter(|p| p.status.is_exposed())
            .map(|p| p.capital_committed)
            .sum();
        let consistent = self.guardrail.reconcile(derived).await;
        if !consistent {
            error!(%derived, "ledger reconciliation adopted derived committed capital");
        }
        consistent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PaperSink;
    use async_trait::async_trait;
    use chrono::Duration;
    use kalshi_core::api::MarketSelector;
    use kalshi_core::config::RiskConfig;
    use kalshi_core::types::{Market, MarketStatus, PositionStatus, Side, StrategyKind};

    fn guardrail() -> Arc<RiskGuardrail> {
        Arc::new(RiskGuardrail::new(RiskConfig {
            per_trade_cap: Decimal::new(100, 2),
            total_capital: Decimal::new(100_000, 2),
            daily_loss_limit: Decimal::new(5_000, 2),
        }))
    }

    fn plan(ticker: &str, price_cents: i64, quantity: i64) -> TradePlan {
        TradePlan {
            ticker: ticker.to_string(),
            side: Side::Yes,
            price_cents,
            quantity,
            edge: 0.10,
            expected_value: Decimal::ZERO,
            strategy: StrategyKind::VolEdge,
            rationale: "test".to_string(),
        }
    }

    /// Catalog serving a single fixed quote.
    struct FixedCatalog(Market);

    #[async_trait]
    impl MarketCatalog for FixedCatalog {
        async fn refresh(&self, _selector: &MarketSelector) -> Result<Vec<Market>> {
            Ok(vec![self.0.clone()])
        }

        async fn quote(&self, _ticker: &str) -> Result<Market> {
            Ok(self.0.clone())
        }
    }

    fn market(yes_bid: i64, yes_ask: i64) -> Market {
        Market {
            ticker: "KXBTC-T".to_string(),
            series_ticker: "KXBTC".to_string(),
            floor_strike: None,
            cap_strike: None,
            close_time: Utc::now() + Duration::minutes(60),
            yes_bid,
            yes_ask,
            no_bid: 100 - yes_ask,
            no_ask: 100 - yes_bid,
            volume: 100,
            status: MarketStatus::Open,
            result: None,
        }
    }

    /// Sink that refuses every order.
    struct RefusingSink;

    #[async_trait]
    impl ExecutionSink for RefusingSink {
        async fn place(&self, _: &str, _: Side, _: i64, _: i64) -> Result<kalshi_core::api::OrderFill> {
            Err(Error::Order {
                message: "rejected".to_string(),
            })
        }

        async fn close(&self, _: &str, _: Side, _: i64, _: i64) -> Result<kalshi_core::api::OrderFill> {
            Err(Error::Order {
                message: "rejected".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn entry_reserves_capital_and_opens() {
        let manager = PositionManager::new(guardrail());
        let sink = PaperSink::new();

        let outcome = manager
            .open_from_plan(&plan("KXBTC-T", 40, 2), &sink)
            .await
            .unwrap();
        let EntryOutcome::Opened(id) = outcome else {
            panic!("expected open, got {outcome:?}");
        };
        assert_eq!(manager.get(id).unwrap().status, PositionStatus::Open);
        assert!(manager.held_tickers().contains("KXBTC-T"));
        assert_eq!(
            manager.guardrail().snapshot().await.committed,
            Decimal::new(80, 2)
        );
    }

    #[tokio::test]
    async fn risk_rejection_leaves_no_position() {
        let manager = PositionManager::new(guardrail());
        let sink = PaperSink::new();

        // $1.20 > $1.00 per-trade cap
        let outcome = manager
            .open_from_plan(&plan("KXBTC-T", 60, 2), &sink)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EntryOutcome::RiskRejected(RejectReason::ExceedsPerTradeCap)
        );
        assert!(manager.held_tickers().is_empty());
        assert_eq!(
            manager.guardrail().snapshot().await.committed,
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn failed_execution_rolls_back_reservation() {
        let manager = PositionManager::new(guardrail());

        let outcome = manager
            .open_from_plan(&plan("KXBTC-T", 40, 2), &RefusingSink)
            .await
            .unwrap();
        assert!(matches!(outcome, EntryOutcome::ExecutionFailed(_)));
        // the failed row is kept for audit but holds no capital
        assert!(manager.held_tickers().is_empty());
        assert_eq!(
            manager.guardrail().snapshot().await.committed,
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn failed_durable_insert_rolls_back_reservation() {
        use std::time::Duration as StdDuration;

        // lazy pool pointing nowhere: the first query fails
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(StdDuration::from_millis(100))
            .connect_lazy("postgres://127.0.0.1:1/unreachable")
            .unwrap();
        let manager = PositionManager::with_persistence(
            guardrail(),
            Arc::new(PositionRepository::new(pool.clone())),
            Arc::new(LedgerRepository::new(pool)),
        );

        let result = manager
            .open_from_plan(&plan("KXBTC-T", 40, 2), &PaperSink::new())
            .await;
        assert!(result.is_err());
        // the reservation must not survive a failed durable write
        assert_eq!(
            manager.guardrail().snapshot().await.committed,
            Decimal::ZERO
        );
        assert!(manager.held_tickers().is_empty());
    }

    #[tokio::test]
    async fn take_profit_exit_releases_capital_and_books_pnl() {
        let manager = PositionManager::new(guardrail());
        let sink = PaperSink::new();
        let cfg = kalshi_core::config::Config::test_config().engine;

        let outcome = manager
            .open_from_plan(&plan("KXBTC-T", 40, 2), &sink)
            .await
            .unwrap();
        let EntryOutcome::Opened(id) = outcome else {
            panic!()
        };

        // yes bid 85 triggers the vol take-profit
        let catalog = FixedCatalog(market(85, 88));
        let summary = manager.evaluate_exits(&catalog, &sink, None, &cfg).await;
        assert_eq!(summary.closed, 1);
        assert!(summary.errors.is_empty());

        let closed = manager.get(id).unwrap();
        assert_eq!(closed.status, PositionStatus::ClosedTakeProfit);
        // (85 - 40) * 2 = 90c
        assert_eq!(closed.realized_pnl, Some(Decimal::new(90, 2)));

        let snap = manager.guardrail().snapshot().await;
        assert_eq!(snap.committed, Decimal::ZERO);
        assert_eq!(snap.realized_pnl_today, Decimal::new(90, 2));
    }

    #[tokio::test]
    async fn failed_close_order_keeps_position_open() {
        let manager = PositionManager::new(guardrail());
        let paper = PaperSink::new();
        let cfg = kalshi_core::config::Config::test_config().engine;

        let EntryOutcome::Opened(id) = manager
            .open_from_plan(&plan("KXBTC-T", 40, 2), &paper)
            .await
            .unwrap()
        else {
            panic!()
        };

        let catalog = FixedCatalog(market(85, 88));
        let summary = manager
            .evaluate_exits(&catalog, &RefusingSink, None, &cfg)
            .await;
        assert_eq!(summary.closed, 0);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(manager.get(id).unwrap().status, PositionStatus::Open);
        // capital stays committed until the close succeeds
        assert_eq!(
            manager.guardrail().snapshot().await.committed,
            Decimal::new(80, 2)
        );
    }

    #[tokio::test]
    async fn settlement_closes_without_an_order() {
        let manager = PositionManager::new(guardrail());
        let paper = PaperSink::new();
        let cfg = kalshi_core::config::Config::test_config().engine;

        let EntryOutcome::Opened(id) = manager
            .open_from_plan(&plan("KXBTC-T", 40, 2), &paper)
            .await
            .unwrap()
        else {
            panic!()
        };

        let mut m = market(1, 2);
        m.status = MarketStatus::Settled;
        m.result = Some(kalshi_core::types::MarketResult::No);
        let catalog = FixedCatalog(m);

        // RefusingSink proves no closing order is placed for settlements
        let summary = manager
            .evaluate_exits(&catalog, &RefusingSink, None, &cfg)
            .await;
        assert_eq!(summary.closed, 1);

        let closed = manager.get(id).unwrap();
        assert_eq!(closed.status, PositionStatus::ClosedExpired);
        // YES settled NO: lose the full 80c entry
        assert_eq!(closed.realized_pnl, Some(Decimal::new(-80, 2)));
    }

    #[tokio::test]
    async fn manual_close_books_at_bid() {
        let manager = PositionManager::new(guardrail());
        let sink = PaperSink::new();

        let EntryOutcome::Opened(id) = manager
            .open_from_plan(&plan("KXBTC-T", 40, 2), &sink)
            .await
            .unwrap()
        else {
            panic!()
        };

        let catalog = FixedCatalog(market(50, 53));
        let pnl = manager.close_manual(id, &catalog, &sink).await.unwrap();
        assert_eq!(pnl, Decimal::new(20, 2));
        assert_eq!(
            manager.get(id).unwrap().status,
            PositionStatus::ClosedManual
        );
    }

    #[tokio::test]
    async fn recovery_resolves_rows_against_exchange_holdings() {
        let manager = PositionManager::new(guardrail());

        let mut held_row = Position::new(
            "KXBTC-A".to_string(),
            Side::Yes,
            40,
            2,
            StrategyKind::VolEdge,
            "held".to_string(),
        );
        held_row.mark_open().unwrap();
        let pending_filled = Position::new(
            "KXBTC-B".to_string(),
            Side::Yes,
            30,
            1,
            StrategyKind::VolEdge,
            "filled".to_string(),
        );
        let pending_void = Position::new(
            "KXBTC-C".to_string(),
            Side::Yes,
            20,
            1,
            StrategyKind::VolEdge,
            "void".to_string(),
        );
        let mut orphan = Position::new(
            "KXBTC-D".to_string(),
            Side::Yes,
            25,
            1,
            StrategyKind::VolEdge,
            "orphan".to_string(),
        );
        orphan.mark_open().unwrap();

        let exchange = vec![
            kalshi_core::api::ExchangePosition {
                ticker: "KXBTC-A".to_string(),
                position: 2,
                market_exposure: 80,
            },
            kalshi_core::api::ExchangePosition {
                ticker: "KXBTC-B".to_string(),
                position: 1,
                market_exposure: 30,
            },
        ];
        let rows = vec![held_row, pending_filled, pending_void, orphan];

        manager
            .restore_state(rows.clone(), Some(&exchange), Decimal::new(-12, 2), false)
            .await
            .unwrap();

        let held = manager.held_tickers();
        assert!(held.contains("KXBTC-A"));
        // pending row the exchange holds is confirmed open
        assert!(held.contains("KXBTC-B"));
        // pending row absent from the exchange never filled
        assert!(!held.contains("KXBTC-C"));
        // open row gone from the exchange was closed out-of-band
        assert!(!held.contains("KXBTC-D"));

        let snap = manager.guardrail().snapshot().await;
        // 80c (A) + 30c (B); voided and orphaned rows hold nothing
        assert_eq!(snap.committed, Decimal::new(110, 2));
        assert_eq!(snap.realized_pnl_today, Decimal::new(-12, 2));
        assert!(!snap.entries_halted);

        // replaying the same rows recomputes rather than accumulates
        manager
            .restore_state(rows, Some(&exchange), Decimal::new(-12, 2), false)
            .await
            .unwrap();
        assert_eq!(
            manager.guardrail().snapshot().await.committed,
            Decimal::new(110, 2)
        );
    }

    #[tokio::test]
    async fn reconcile_detects_drift() {
        let manager = PositionManager::new(guardrail());
        let sink = PaperSink::new();
        manager
            .open_from_plan(&plan("KXBTC-T", 40, 2), &sink)
            .await
            .unwrap();

        assert!(manager.reconcile_ledger().await);

        // simulate a drifted ledger
        manager.guardrail().rollback(Decimal::new(30, 2)).await;
        assert!(!manager.reconcile_ledger().await);
        assert!(manager.guardrail().entries_halted());
    }
}
