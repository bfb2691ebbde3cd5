//! Decision engine output. Ephemeral: consumed by the risk guardrail,
//! never persisted.

use crate::types::{Side, StrategyKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the decision engine declined to trade a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    StaleSignal,
    InvalidQuote,
    ExpiresTooSoon { minutes_left: i64 },
    InsufficientEdge { edge: f64 },
    NoForecastMatch,
    PriceAboveThreshold { ask_cents: i64 },
    SpreadTooWide { spread_cents: i64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::StaleSignal => write!(f, "stale signal"),
            SkipReason::InvalidQuote => write!(f, "missing or invalid quote"),
            SkipReason::ExpiresTooSoon { minutes_left } => {
                write!(f, "expires in {minutes_left}min")
            }
            SkipReason::InsufficientEdge { edge } => {
                write!(f, "edge {:.1}% below threshold", edge * 100.0)
            }
            SkipReason::NoForecastMatch => write!(f, "forecast outside bucket"),
            SkipReason::PriceAboveThreshold { ask_cents } => {
                write!(f, "ask {ask_cents}c at or above entry threshold")
            }
            SkipReason::SpreadTooWide { spread_cents } => {
                write!(f, "spread {spread_cents}c too wide")
            }
        }
    }
}

/// A concrete, capital-bounded trade the engine recommends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub ticker: String,
    pub side: Side,
    /// Limit price in cents.
    pub price_cents: i64,
    pub quantity: i64,
    /// Signed edge fraction vs. the execution price.
    pub edge: f64,
    /// Expected profit in dollars for the full quantity, net of fees.
    pub expected_value: Decimal,
    pub strategy: StrategyKind,
    /// Human-readable audit string for the position record.
    pub rationale: String,
}

impl TradePlan {
    /// Capital this trade commits: price * quantity, in dollars.
    pub fn capital_required(&self) -> Decimal {
        Decimal::new(self.price_cents * self.quantity, 2)
    }
}

/// Result of evaluating one signal against one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Recommendation {
    Buy(TradePlan),
    Skip { ticker: String, reason: SkipReason },
}

impl Recommendation {
    pub fn skip(ticker: impl Into<String>, reason: SkipReason) -> Self {
        Self::Skip { ticker: ticker.into(), reason }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Recommendation::Buy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capital_required_is_price_times_quantity() {
        let plan = TradePlan {
            ticker: "KXBTC-X".to_string(),
            side: Side::Yes,
            price_cents: 14,
            quantity: 7,
            edge: 0.10,
            expected_value: Decimal::ZERO,
            strategy: StrategyKind::Weather,
            rationale: String::new(),
        };
        // 14c * 7 = 98c = $0.98
        assert_eq!(plan.capital_required(), Decimal::new(98, 2));
    }
}
