//! Kalshi Trading Bot
//!
//! Runs two strategies against Kalshi prediction markets under a shared
//! risk ledger: a volatility-edge model on hourly BTC range markets and a
//! deterministic forecast-threshold strategy on daily high-temperature
//! markets. Orders are simulated locally unless LIVE_TRADING is set.

use anyhow::{Context, Result};
use kalshi_core::api::{KalshiAuth, KalshiClient, MarketCatalog, MarketSelector};
use kalshi_core::config::Config;
use kalshi_core::db::{self, cycles::CycleRepository, ledger::LedgerRepository, positions::PositionRepository};
use risk_manager::RiskGuardrail;
use signal_sources::{CoinbaseSpot, NoaaClient, VolEdgeSource, WeatherSource};
use std::sync::Arc;
use tokio::sync::watch;
use trading_engine::{
    DecisionEngine, ExecutionSink, LiveSink, PaperSink, PositionManager, StrategyRunner,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// BTC hourly range markets.
const VOL_SERIES: &str = "KXBTC";
/// Daily high-temperature series share this prefix, one per city.
const WEATHER_SERIES_PREFIX: &str = "KXHIGH";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bot=info,kalshi_core=info,signal_sources=info,risk_manager=info,trading_engine=info,hyper=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting kalshi trading bot");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = db::create_pool(&config.database)
        .await
        .context("failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let position_repo = Arc::new(PositionRepository::new(pool.clone()));
    let ledger_repo = Arc::new(LedgerRepository::new(pool.clone()));
    let cycle_repo = Arc::new(CycleRepository::new(pool.clone()));

    // Market data comes over signed endpoints, so credentials are needed
    // even for paper runs.
    let access_key = config.kalshi.access_key.clone().ok_or_else(|| {
        anyhow::anyhow!("KALSHI_ACCESS_KEY is required (market data is signed)")
    })?;
    let private_key_pem = config.kalshi.private_key_pem.clone().ok_or_else(|| {
        anyhow::anyhow!("KALSHI_PRIVATE_KEY_PEM is required (market data is signed)")
    })?;
    let auth = KalshiAuth::new(access_key, &private_key_pem)
        .context("failed to load Kalshi signing key")?;
    let client = Arc::new(
        KalshiClient::new(config.kalshi.api_base.clone(), auth)
            .context("failed to build Kalshi client")?,
    );
    let catalog: Arc<dyn MarketCatalog> = client.clone();

    let guardrail = Arc::new(RiskGuardrail::new(config.risk.clone()));
    let manager = Arc::new(PositionManager::with_persistence(
        guardrail,
        position_repo,
        ledger_repo,
    ));

    // Restore durable state. In live mode pending entries are resolved
    // against the exchange's own holdings.
    let exchange_positions = if config.kalshi.live_trading {
        Some(
            client
                .get_positions()
                .await
                .context("failed to fetch exchange positions for recovery")?,
        )
    } else {
        None
    };
    manager
        .recover(exchange_positions.as_deref())
        .await
        .context("failed to recover position state")?;

    let sink: Arc<dyn ExecutionSink> = if config.kalshi.live_trading {
        info!("LIVE TRADING enabled: orders will reach the exchange");
        Arc::new(LiveSink::new(client.clone()))
    } else {
        info!("paper mode: orders are simulated locally");
        Arc::new(PaperSink::new())
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let vol_runner = StrategyRunner::new(
        MarketSelector::Series(VOL_SERIES.to_string()),
        catalog.clone(),
        Box::new(VolEdgeSource::new(Box::new(
            CoinbaseSpot::new().context("failed to build spot price client")?,
        ))),
        DecisionEngine::new(config.engine.clone(), config.risk.per_trade_cap),
        manager.clone(),
        sink.clone(),
        Some(cycle_repo.clone()),
        config.engine.clone(),
    );

    let weather_runner = StrategyRunner::new(
        MarketSelector::SeriesPrefix(WEATHER_SERIES_PREFIX.to_string()),
        catalog.clone(),
        Box::new(WeatherSource::new(Box::new(
            NoaaClient::new().context("failed to build forecast client")?,
        ))),
        DecisionEngine::new(config.engine.clone(), config.risk.per_trade_cap),
        manager.clone(),
        sink.clone(),
        Some(cycle_repo),
        config.engine.clone(),
    );

    let vol_handle = tokio::spawn(vol_runner.run(shutdown_rx.clone()));
    let weather_handle = tokio::spawn(weather_runner.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested, letting in-flight cycles finish");
    shutdown_tx.send(true).ok();

    if let Err(e) = vol_handle.await {
        warn!(error = %e, "vol strategy task ended abnormally");
    }
    if let Err(e) = weather_handle.await {
        warn!(error = %e, "weather strategy task ended abnormally");
    }

    let snapshot = manager.guardrail().snapshot().await;
    info!(
        committed = %snapshot.committed,
        realized_pnl_today = %snapshot.realized_pnl_today,
        "shutdown complete"
    );
    Ok(())
}
