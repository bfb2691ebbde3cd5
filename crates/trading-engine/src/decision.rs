//! Decision engine: one signal plus one market in, one recommendation out.
//!
//! Pure and synchronous. Entry gating lives here (freshness, quote sanity,
//! expiry window, thresholds); capital checks belong to the risk guardrail
//! and happen after a Buy comes out of this engine.

use chrono::{DateTime, Duration, Utc};
use kalshi_core::config::EngineConfig;
use kalshi_core::types::{
    Market, Recommendation, Side, Signal, SignalKind, SkipReason, StrategyKind, TradePlan,
};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Maximum spread accepted on deterministic entries, in cents.
const WEATHER_MAX_SPREAD_CENTS: i64 = 3;

/// Stateless recommendation engine.
#[derive(Clone)]
pub struct DecisionEngine {
    cfg: EngineConfig,
    /// Per-trade budget in cents, for sizing.
    budget_cents: i64,
}

impl DecisionEngine {
    pub fn new(cfg: EngineConfig, per_trade_budget: Decimal) -> Self {
        let budget_cents = (per_trade_budget * Decimal::new(100, 0))
            .trunc()
            .to_i64()
            .unwrap_or(100);
        Self { cfg, budget_cents }
    }

    /// Evaluate one signal against the market it references.
    pub fn evaluate(&self, market: &Market, signal: &Signal, now: DateTime<Utc>) -> Recommendation {
        if signal.is_stale(Duration::seconds(self.cfg.signal_freshness_secs), now) {
            return Recommendation::skip(&market.ticker, SkipReason::StaleSignal);
        }
        if !market.has_valid_quote() {
            return Recommendation::skip(&market.ticker, SkipReason::InvalidQuote);
        }

        match signal.kind {
            SignalKind::Probability { estimate, .. } => self.evaluate_edge(market, estimate, now),
            SignalKind::Deterministic { matched } => self.evaluate_threshold(market, matched, now),
        }
    }

    /// Probabilistic entry: model estimate vs. the execution price, on
    /// whichever side clears the minimum edge. YES is preferred when both
    /// would (they cannot both clear with a positive spread).
    fn evaluate_edge(&self, market: &Market, estimate: f64, now: DateTime<Utc>) -> Recommendation {
        let minutes_left = market.minutes_to_close(now);
        if minutes_left < self.cfg.vol_min_horizon_mins {
            return Recommendation::skip(
                &market.ticker,
                SkipReason::ExpiresTooSoon {
                    minutes_left: minutes_left as i64,
                },
            );
        }

        let yes_ask = market.ask_for(Side::Yes);
        let no_ask = market.ask_for(Side::No);
        let edge_yes = estimate - yes_ask as f64 / 100.0;
        let edge_no = (1.0 - estimate) - no_ask as f64 / 100.0;

        // Inclusive threshold; the epsilon keeps an exactly-at-threshold
        // edge from flipping to a skip on f64 representation error
        // (0.88 - 80/100 lands just below 0.08).
        let floor = self.cfg.min_edge - 1e-9;
        let (side, price_cents, edge) = if edge_yes >= floor {
            (Side::Yes, yes_ask, edge_yes)
        } else if edge_no >= floor {
            (Side::No, no_ask, edge_no)
        } else {
            return Recommendation::skip(
                &market.ticker,
                SkipReason::InsufficientEdge {
                    edge: edge_yes.max(edge_no),
                },
            );
        };

        if !(1..100).contains(&price_cents) {
            return Recommendation::skip(&market.ticker, SkipReason::InvalidQuote);
        }

        let quantity = self.size(price_cents);
        Recommendation::Buy(TradePlan {
            ticker: market.ticker.clone(),
            side,
            price_cents,
            quantity,
            edge,
            expected_value: expected_value_dollars(edge, quantity),
            strategy: StrategyKind::VolEdge,
            rationale: format!(
                "model {:.1}% vs {} ask {}c, edge {:+.1}%",
                estimate * 100.0,
                side.as_str(),
                price_cents,
                edge * 100.0
            ),
        })
    }

    /// Deterministic entry: forecast matched the bucket and YES is still
    /// cheap. Strictly below the threshold; at the threshold is a skip.
    fn evaluate_threshold(
        &self,
        market: &Market,
        matched: bool,
        now: DateTime<Utc>,
    ) -> Recommendation {
        if !matched {
            return Recommendation::skip(&market.ticker, SkipReason::NoForecastMatch);
        }

        let minutes_left = market.minutes_to_close(now);
        if minutes_left < self.cfg.weather_min_horizon_mins {
            return Recommendation::skip(
                &market.ticker,
                SkipReason::ExpiresTooSoon {
                    minutes_left: minutes_left as i64,
                },
            );
        }

        let spread = market.spread_cents();
        if spread > WEATHER_MAX_SPREAD_CENTS {
            return Recommendation::skip(
                &market.ticker,
                SkipReason::SpreadTooWide {
                    spread_cents: spread,
                },
            );
        }

        let ask = market.ask_for(Side::Yes);
        if ask >= self.cfg.det_entry_cents {
            return Recommendation::skip(
                &market.ticker,
                SkipReason::PriceAboveThreshold { ask_cents: ask },
            );
        }

        let quantity = self.size(ask);
        let edge = 1.0 - ask as f64 / 100.0;
        Recommendation::Buy(TradePlan {
            ticker: market.ticker.clone(),
            side: Side::Yes,
            price_cents: ask,
            quantity,
            edge,
            expected_value: expected_value_dollars(edge, quantity),
            strategy: StrategyKind::Weather,
            rationale: format!("forecast in bucket, yes ask {ask}c below entry threshold"),
        })
    }

    /// Contracts per trade: fill the budget, never zero.
    fn size(&self, price_cents: i64) -> i64 {
        (self.budget_cents / price_cents.max(1)).max(1)
    }
}

/// Edge times quantity, as dollars rounded half-even. This is the one place
/// a float crosses into money. Exchange fees are not modeled; the figure is
/// gross expected value.
fn expected_value_dollars(edge: f64, quantity: i64) -> Decimal {
    Decimal::from_f64(edge * quantity as f64)
        .unwrap_or(Decimal::ZERO)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kalshi_core::types::MarketStatus;

    fn engine() -> DecisionEngine {
        DecisionEngine::new(
            kalshi_core::config::Config::test_config().engine,
            Decimal::new(100, 2),
        )
    }

    fn market(yes_bid: i64, yes_ask: i64, minutes: i64) -> Market {
        Market {
            ticker: "KXBTC-TEST".to_string(),
            series_ticker: "KXBTC".to_string(),
            floor_strike: Some(Decimal::new(100_000, 0)),
            cap_strike: Some(Decimal::new(110_000, 0)),
            close_time: Utc::now() + Duration::minutes(minutes),
            yes_bid,
            yes_ask,
            no_bid: 100 - yes_ask,
            no_ask: 100 - yes_bid,
            volume: 1000,
            status: MarketStatus::Open,
            result: None,
        }
    }

    fn engine_with(f: impl FnOnce(&mut EngineConfig)) -> DecisionEngine {
        let mut cfg = kalshi_core::config::Config::test_config().engine;
        f(&mut cfg);
        DecisionEngine::new(cfg, Decimal::new(100, 2))
    }

    fn prob(estimate: f64) -> Signal {
        Signal::probability("KXBTC-TEST", estimate, 1.0, StrategyKind::VolEdge)
    }

    fn det(matched: bool) -> Signal {
        Signal::deterministic("KXBTC-TEST", matched, StrategyKind::Weather)
    }

    fn reason(rec: &Recommendation) -> &SkipReason {
        match rec {
            Recommendation::Skip { reason, .. } => reason,
            Recommendation::Buy(plan) => panic!("expected skip, got buy of {}", plan.ticker),
        }
    }

    #[test]
    fn buys_yes_when_edge_clears_threshold() {
        // estimate 93% vs 80c ask: edge +13%
        let rec = engine().evaluate(&market(78, 80, 60), &prob(0.93), Utc::now());
        match rec {
            Recommendation::Buy(plan) => {
                assert_eq!(plan.side, Side::Yes);
                assert_eq!(plan.price_cents, 80);
                assert!((plan.edge - 0.13).abs() < 1e-9);
                assert_eq!(plan.quantity, 1); // $1 budget at 80c
            }
            _ => panic!("expected buy"),
        }
    }

    #[test]
    fn edge_threshold_is_inclusive() {
        // estimate 88% vs 80c ask: edge exactly +8%
        let rec = engine().evaluate(&market(78, 80, 60), &prob(0.88), Utc::now());
        assert!(rec.is_buy());

        // estimate 85% vs 80c ask: edge +5%, below threshold
        let rec = engine().evaluate(&market(78, 80, 60), &prob(0.85), Utc::now());
        assert!(matches!(
            reason(&rec),
            SkipReason::InsufficientEdge { .. }
        ));
    }

    #[test]
    fn buys_no_when_yes_overpriced() {
        // estimate 10% but NO ask is 100-22=78c: edge_no = 0.90 - 0.78 = +12%
        let rec = engine().evaluate(&market(22, 25, 60), &prob(0.10), Utc::now());
        match rec {
            Recommendation::Buy(plan) => {
                assert_eq!(plan.side, Side::No);
                assert_eq!(plan.price_cents, 78);
            }
            _ => panic!("expected buy of NO"),
        }
    }

    #[test]
    fn stale_signal_is_never_traded() {
        let mut sig = prob(0.93);
        sig.produced_at = Utc::now() - Duration::minutes(10);
        let rec = engine().evaluate(&market(78, 80, 60), &sig, Utc::now());
        assert_eq!(reason(&rec), &SkipReason::StaleSignal);
    }

    #[test]
    fn invalid_quote_is_skipped() {
        let rec = engine().evaluate(&market(0, 80, 60), &prob(0.93), Utc::now());
        assert_eq!(reason(&rec), &SkipReason::InvalidQuote);
    }

    #[test]
    fn imminent_expiry_is_skipped() {
        let rec = engine().evaluate(&market(78, 80, 3), &prob(0.93), Utc::now());
        assert!(matches!(reason(&rec), SkipReason::ExpiresTooSoon { .. }));
    }

    #[test]
    fn deterministic_entry_is_strictly_below_threshold() {
        // ask 14c: buy
        let rec = engine().evaluate(&market(12, 14, 300), &det(true), Utc::now());
        match rec {
            Recommendation::Buy(plan) => {
                assert_eq!(plan.price_cents, 14);
                assert_eq!(plan.side, Side::Yes);
                assert_eq!(plan.quantity, 7); // $1 budget at 14c
                assert_eq!(plan.capital_required(), Decimal::new(98, 2));
            }
            _ => panic!("expected buy"),
        }

        // ask exactly 15c: skip
        let rec = engine().evaluate(&market(13, 15, 300), &det(true), Utc::now());
        assert_eq!(
            reason(&rec),
            &SkipReason::PriceAboveThreshold { ask_cents: 15 }
        );
    }

    #[test]
    fn forecast_mismatch_is_skipped() {
        let rec = engine().evaluate(&market(12, 14, 300), &det(false), Utc::now());
        assert_eq!(reason(&rec), &SkipReason::NoForecastMatch);
    }

    #[test]
    fn wide_spread_blocks_deterministic_entry() {
        let rec = engine().evaluate(&market(8, 14, 300), &det(true), Utc::now());
        assert_eq!(reason(&rec), &SkipReason::SpreadTooWide { spread_cents: 6 });
    }

    #[test]
    fn weather_requires_two_hours_to_resolution() {
        let rec = engine().evaluate(&market(12, 14, 90), &det(true), Utc::now());
        assert!(matches!(reason(&rec), SkipReason::ExpiresTooSoon { .. }));
    }

    #[test]
    fn expiry_horizons_come_from_config() {
        // 20 minutes out clears the default 5-minute vol horizon but not a
        // configured 30-minute one
        let rec = engine().evaluate(&market(50, 55, 20), &prob(0.90), Utc::now());
        assert!(rec.is_buy());
        let tight = engine_with(|cfg| cfg.vol_min_horizon_mins = 30.0);
        let rec = tight.evaluate(&market(50, 55, 20), &prob(0.90), Utc::now());
        assert!(matches!(reason(&rec), SkipReason::ExpiresTooSoon { .. }));

        // and the weather guard relaxes the same way
        let relaxed = engine_with(|cfg| cfg.weather_min_horizon_mins = 60.0);
        let rec = relaxed.evaluate(&market(12, 14, 90), &det(true), Utc::now());
        assert!(rec.is_buy());
    }

    #[test]
    fn expected_value_rounds_half_even() {
        // 0.125 rounds to 0.12 under banker's rounding
        assert_eq!(expected_value_dollars(0.125, 1), Decimal::new(12, 2));
        assert_eq!(expected_value_dollars(0.135, 1), Decimal::new(14, 2));
    }
}
