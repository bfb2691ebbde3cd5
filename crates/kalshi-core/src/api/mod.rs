//! Exchange API access: request signing and the REST client.

mod auth;
mod client;

pub use auth::{KalshiAuth, SignedHeaders};
pub use client::{ExchangePosition, KalshiClient, OrderFill};

use crate::types::Market;
use crate::Result;
use async_trait::async_trait;

/// Which slice of the exchange a strategy trades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketSelector {
    /// A single series, e.g. "KXBTC".
    Series(String),
    /// Every series whose ticker starts with the prefix, e.g. "KXHIGH"
    /// for the daily-high temperature family.
    SeriesPrefix(String),
}

impl MarketSelector {
    pub fn matches(&self, series_ticker: &str) -> bool {
        match self {
            MarketSelector::Series(s) => series_ticker == s,
            MarketSelector::SeriesPrefix(p) => series_ticker.starts_with(p.as_str()),
        }
    }
}

/// Read-only view of tradeable markets. Implemented by the live REST client
/// and by in-memory fixtures in tests.
#[async_trait]
pub trait MarketCatalog: Send + Sync {
    /// All open markets matching the selector, with current quotes.
    async fn refresh(&self, selector: &MarketSelector) -> Result<Vec<Market>>;

    /// Latest snapshot of a single market.
    async fn quote(&self, ticker: &str) -> Result<Market>;
}
