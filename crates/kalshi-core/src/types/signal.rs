//! Trading signals produced by the pluggable signal sources.

use crate::types::Market;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Strategy that originated a signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// GBM volatility model vs. execution price on BTC range markets.
    VolEdge,
    /// Deterministic NOAA forecast match on daily-high temperature markets.
    Weather,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::VolEdge => "vol_edge",
            StrategyKind::Weather => "weather",
        }
    }
}

/// Strategy-specific payload of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalKind {
    /// Probabilistic estimate in [0, 1] with source confidence.
    Probability { estimate: f64, confidence: f64 },
    /// Deterministic threshold match (forecast inside the strike bucket).
    Deterministic { matched: bool },
}

/// An immutable forecast for one market, produced by a signal source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub kind: SignalKind,
    pub produced_at: DateTime<Utc>,
    pub source: StrategyKind,
}

impl Signal {
    pub fn probability(
        ticker: impl Into<String>,
        estimate: f64,
        confidence: f64,
        source: StrategyKind,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            kind: SignalKind::Probability { estimate, confidence },
            produced_at: Utc::now(),
            source,
        }
    }

    pub fn deterministic(ticker: impl Into<String>, matched: bool, source: StrategyKind) -> Self {
        Self {
            ticker: ticker.into(),
            kind: SignalKind::Deterministic { matched },
            produced_at: Utc::now(),
            source,
        }
    }

    /// Stale signals must be discarded by the decision engine, never traded.
    pub fn is_stale(&self, freshness: Duration, now: DateTime<Utc>) -> bool {
        now - self.produced_at > freshness
    }
}

/// Re-estimation seam used by exit monitoring: given the current quote,
/// produce a fresh probability for the market, if the model can.
pub trait ProbabilityModel: Send + Sync {
    fn estimate(&self, market: &Market, now: DateTime<Utc>) -> Option<f64>;
}
