//! Signal sources for the trading engine.
//!
//! Each source watches one market family and emits [`Signal`]s the decision
//! engine turns into trade recommendations:
//!
//! - [`VolEdgeSource`]: GBM terminal-distribution probabilities for BTC
//!   range markets, driven by a rolling realized-volatility estimate.
//! - [`WeatherSource`]: deterministic NOAA daily-high forecast matches for
//!   temperature bucket markets.

pub mod noaa;
pub mod vol_edge;
pub mod weather;

pub use noaa::NoaaClient;
pub use vol_edge::{CoinbaseSpot, GbmModel, SpotPriceSource, VolEdgeSource, VolEstimator};
pub use weather::{ForecastSource, WeatherSource};

use async_trait::async_trait;
use kalshi_core::types::{Market, ProbabilityModel, Signal, StrategyKind};
use kalshi_core::Result;

/// A strategy's signal producer. Called once per execution cycle with the
/// current market snapshot; sources may keep state between calls (rolling
/// windows, caches).
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn strategy(&self) -> StrategyKind;

    /// Produce signals for the given markets. A market without a signal is
    /// simply not traded this cycle.
    async fn signals(&mut self, markets: &[Market]) -> Result<Vec<Signal>>;

    /// Current probability model for exit re-estimation. `None` for
    /// deterministic sources or before the first successful cycle.
    fn probability_model(&self) -> Option<Box<dyn ProbabilityModel>> {
        None
    }
}
