//! Per-strategy execution loop.
//!
//! Each strategy runs on its own tick: refresh markets, gather signals,
//! sweep exits, then consider entries. Exits always run before entries so
//! freed capital is available in the same cycle. Any single market or
//! order failure is logged into the cycle record and never aborts the
//! rest of the cycle.

use crate::decision::DecisionEngine;
use crate::executor::ExecutionSink;
use crate::position_manager::{EntryOutcome, PositionManager};
use kalshi_core::api::{MarketCatalog, MarketSelector};
use kalshi_core::config::EngineConfig;
use kalshi_core::db::cycles::CycleRepository;
use kalshi_core::types::{CycleRecord, Recommendation, Signal, TradePlan};
use signal_sources::SignalSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Drives one strategy: its market universe, signal source, and decision
/// engine, sharing the position manager and sink with other runners.
pub struct StrategyRunner {
    selector: MarketSelector,
    catalog: Arc<dyn MarketCatalog>,
    source: Box<dyn SignalSource>,
    engine: DecisionEngine,
    manager: Arc<PositionManager>,
    sink: Arc<dyn ExecutionSink>,
    cycles: Option<Arc<CycleRepository>>,
    cfg: EngineConfig,
}

impl StrategyRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        selector: MarketSelector,
        catalog: Arc<dyn MarketCatalog>,
        source: Box<dyn SignalSource>,
        engine: DecisionEngine,
        manager: Arc<PositionManager>,
        sink: Arc<dyn ExecutionSink>,
        cycles: Option<Arc<CycleRepository>>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            selector,
            catalog,
            source,
            engine,
            manager,
            sink,
            cycles,
            cfg,
        }
    }

    /// Tick until the shutdown signal flips. The in-flight cycle always
    /// finishes before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let strategy = self.source.strategy();
        info!(strategy = strategy.as_str(), tick_secs = self.cfg.tick_secs, "strategy runner started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let record = self.run_cycle().await;
            self.record_cycle(&record).await;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.cfg.tick_secs)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(strategy = strategy.as_str(), "strategy runner stopped");
    }

    /// One full cycle: refresh, signals, exits, entries.
    pub async fn run_cycle(&mut self) -> CycleRecord {
        let mut record = CycleRecord::start(self.source.strategy());

        let markets = match self.catalog.refresh(&self.selector).await {
            Ok(markets) => markets,
            Err(e) => {
                error!(error = %e, "market refresh failed, skipping cycle");
                record.errors.push(format!("refresh: {e}"));
                record.finish();
                return record;
            }
        };
        record.markets_evaluated = markets.len() as u32;

        let signals = match self.source.signals(&markets).await {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, "signal source failed, running exits only");
                record.errors.push(format!("signals: {e}"));
                Vec::new()
            }
        };
        record.signals_received = signals.len() as u32;

        // Exits first, so capital released this tick can back new entries.
        let model = self.source.probability_model();
        let exits = self
            .manager
            .evaluate_exits(
                self.catalog.as_ref(),
                self.sink.as_ref(),
                model.as_deref(),
                &self.cfg,
            )
            .await;
        record.positions_closed = exits.closed;
        record.errors.extend(exits.errors);

        self.manager.reconcile_ledger().await;

        self.run_entries(&markets, &signals, &mut record).await;

        record.finish();
        info!(
            strategy = record.strategy.as_str(),
            markets = record.markets_evaluated,
            signals = record.signals_received,
            opened = record.trades_opened,
            closed = record.positions_closed,
            skipped = record.skips.len(),
            errors = record.errors.len(),
            "cycle complete"
        );
        record
    }

    async fn run_entries(
        &self,
        markets: &[kalshi_core::types::Market],
        signals: &[Signal],
        record: &mut CycleRecord,
    ) {
        let by_ticker: HashMap<&str, &Signal> =
            signals.iter().map(|s| (s.ticker.as_str(), s)).collect();
        let held = self.manager.held_tickers();
        let now = chrono::Utc::now();

        let mut plans: Vec<TradePlan> = Vec::new();
        for market in markets {
            if held.contains(&market.ticker) {
                debug!(ticker = %market.ticker, "already holding, skipping");
                continue;
            }
            let Some(signal) = by_ticker.get(market.ticker.as_str()) else {
                continue;
            };
            match self.engine.evaluate(market, signal, now) {
                Recommendation::Buy(plan) => plans.push(plan),
                Recommendation::Skip { ticker, reason } => {
                    debug!(%ticker, %reason, "skipped");
                    record.skips.push(format!("{ticker}: {reason}"));
                }
            }
        }

        // Best edges first; the per-cycle cap bounds how fast capital
        // deploys on any one tick.
        plans.sort_by(|a, b| b.edge.partial_cmp(&a.edge).unwrap_or(std::cmp::Ordering::Equal));
        plans.truncate(self.cfg.max_trades_per_cycle as usize);

        for plan in plans {
            match self.manager.open_from_plan(&plan, self.sink.as_ref()).await {
                Ok(EntryOutcome::Opened(_)) => record.trades_opened += 1,
                Ok(EntryOutcome::RiskRejected(reason)) => {
                    record.skips.push(format!("{}: {reason}", plan.ticker));
                }
                Ok(EntryOutcome::ExecutionFailed(message)) => {
                    record.errors.push(format!("{}: {message}", plan.ticker));
                }
                Err(e) => {
                    error!(ticker = %plan.ticker, error = %e, "entry failed");
                    record.errors.push(format!("{}: {e}", plan.ticker));
                }
            }
        }
    }

    async fn record_cycle(&self, record: &CycleRecord) {
        if let Some(cycles) = &self.cycles {
            if let Err(e) = cycles.insert(record).await {
                warn!(error = %e, "failed to persist cycle record");
            }
        }
    }
}
