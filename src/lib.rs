//! Kalshi Trading Bot
//!
//! This is the root crate that ties the workspace together for
//! integration tests. For actual functionality, use the individual
//! crates directly:
//!
//! - `kalshi-core`: Core types, Kalshi API client, configuration, database
//! - `signal-sources`: Volatility-edge model and weather forecast signals
//! - `risk-manager`: Capital ledger, per-trade and exposure caps, daily loss halt
//! - `trading-engine`: Decision engine, position lifecycle, strategy scheduler
//! - `bot`: The runnable binary

pub use kalshi_core as core;
pub use risk_manager as risk;
pub use signal_sources as signals;
pub use trading_engine as trading;
