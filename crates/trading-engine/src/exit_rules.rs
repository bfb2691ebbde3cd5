//! Exit rules for open positions.
//!
//! Checked in strict priority order each cycle: settlement first, then
//! take-profit, then stop-loss. At most one exit fires per position per
//! cycle.

use chrono::{DateTime, Utc};
use kalshi_core::config::EngineConfig;
use kalshi_core::types::{
    ExitKind, Market, MarketStatus, Position, ProbabilityModel, Side, StrategyKind,
};

/// Take-profit on a YES vol position: exit value nearly realized.
const VOL_TP_YES_BID_CENTS: i64 = 80;
/// Take-profit on a NO vol position: YES side nearly dead.
const VOL_TP_NO_YES_ASK_CENTS: i64 = 5;
/// Edge-flip stops only fire once the position is down more than this.
const EDGE_FLIP_MIN_LOSS: f64 = 0.05;
/// Reference horizon for the decayed edge-flip tolerance, in minutes (one
/// day).
const EDGE_DECAY_HORIZON_MINS: f64 = 1440.0;

/// A concrete exit to execute: kind, the price to book, and the audit
/// string.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub kind: ExitKind,
    pub exit_price_cents: i64,
    pub reason: String,
}

/// Evaluate all exit conditions for one open position against the current
/// market snapshot. Returns the highest-priority exit that applies.
pub fn evaluate_exit(
    position: &Position,
    market: &Market,
    model: Option<&dyn ProbabilityModel>,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> Option<ExitDecision> {
    // 1. Settlement: the exchange already decided, book the terminal value.
    if matches!(market.status, MarketStatus::Closed | MarketStatus::Settled) {
        if let Some(result) = market.result {
            return Some(ExitDecision {
                kind: ExitKind::Expired,
                exit_price_cents: position.side.settlement_cents(result),
                reason: format!("settled {result:?}"),
            });
        }
    }
    // Past close with no result yet: wait for settlement, never trade.
    if market.is_expired(now) {
        return None;
    }

    let bid = market.bid_for(position.side);

    // 2. Take-profit.
    if let Some(decision) = take_profit(position, market, cfg, bid) {
        return Some(decision);
    }

    // 3. Stop-loss: hard percentage stop, then the model-based edge flip.
    let loss_pct = position.unrealized_loss_pct(bid);
    if loss_pct >= cfg.stop_loss_pct {
        return Some(ExitDecision {
            kind: ExitKind::StopLoss,
            exit_price_cents: bid,
            reason: format!(
                "stop loss: down {:.0}% of entry (limit {:.0}%)",
                loss_pct * 100.0,
                cfg.stop_loss_pct * 100.0
            ),
        });
    }

    if loss_pct > EDGE_FLIP_MIN_LOSS {
        if let Some(model) = model {
            if let Some(estimate) = model.estimate(market, now) {
                let edge = match position.side {
                    Side::Yes => estimate - market.ask_for(Side::Yes) as f64 / 100.0,
                    Side::No => (1.0 - estimate) - market.ask_for(Side::No) as f64 / 100.0,
                };
                // Tolerance shrinks as expiry approaches: a flipped edge
                // far from resolution may still revert, one near expiry
                // will not.
                let minutes_left = market.minutes_to_close(now).max(0.0);
                let tolerance =
                    cfg.min_edge * (minutes_left / EDGE_DECAY_HORIZON_MINS).sqrt().min(1.0);
                if edge < -tolerance {
                    return Some(ExitDecision {
                        kind: ExitKind::StopLoss,
                        exit_price_cents: bid,
                        reason: format!(
                            "edge flipped to {:+.1}% while down {:.0}%",
                            edge * 100.0,
                            loss_pct * 100.0
                        ),
                    });
                }
            }
        }
    }

    None
}

fn take_profit(
    position: &Position,
    market: &Market,
    cfg: &EngineConfig,
    bid: i64,
) -> Option<ExitDecision> {
    match position.strategy {
        StrategyKind::Weather => {
            // Inclusive threshold: bid at 45c closes.
            if bid >= cfg.det_take_profit_cents {
                return Some(ExitDecision {
                    kind: ExitKind::TakeProfit,
                    exit_price_cents: bid,
                    reason: format!("take profit: bid {bid}c reached target"),
                });
            }
        }
        StrategyKind::VolEdge => match position.side {
            Side::Yes => {
                if market.yes_bid >= VOL_TP_YES_BID_CENTS {
                    return Some(ExitDecision {
                        kind: ExitKind::TakeProfit,
                        exit_price_cents: market.yes_bid,
                        reason: format!("take profit: yes bid {}c", market.yes_bid),
                    });
                }
            }
            Side::No => {
                if market.yes_ask > 0 && market.yes_ask <= VOL_TP_NO_YES_ASK_CENTS {
                    return Some(ExitDecision {
                        kind: ExitKind::TakeProfit,
                        exit_price_cents: bid,
                        reason: format!("take profit: yes ask down to {}c", market.yes_ask),
                    });
                }
            }
        },
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kalshi_core::types::MarketResult;
    use rust_decimal::Decimal;

    fn cfg() -> EngineConfig {
        kalshi_core::config::Config::test_config().engine
    }

    fn market(yes_bid: i64, yes_ask: i64, minutes: i64) -> Market {
        Market {
            ticker: "T".to_string(),
            series_ticker: "S".to_string(),
            floor_strike: Some(Decimal::new(100_000, 0)),
            cap_strike: Some(Decimal::new(110_000, 0)),
            close_time: Utc::now() + Duration::minutes(minutes),
            yes_bid,
            yes_ask,
            no_bid: 100 - yes_ask,
            no_ask: 100 - yes_bid,
            volume: 100,
            status: MarketStatus::Open,
            result: None,
        }
    }

    fn open_position(strategy: StrategyKind, side: Side, entry: i64) -> Position {
        let mut pos = Position::new("T".to_string(), side, entry, 5, strategy, String::new());
        pos.mark_open().unwrap();
        pos
    }

    struct FixedModel(f64);

    impl ProbabilityModel for FixedModel {
        fn estimate(&self, _market: &Market, _now: DateTime<Utc>) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn settlement_takes_priority_over_everything() {
        let pos = open_position(StrategyKind::VolEdge, Side::Yes, 50);
        // bid would also trigger take-profit, but settlement wins
        let mut m = market(85, 88, 0);
        m.status = MarketStatus::Settled;
        m.result = Some(MarketResult::No);

        let d = evaluate_exit(&pos, &m, None, &cfg(), Utc::now()).unwrap();
        assert_eq!(d.kind, ExitKind::Expired);
        assert_eq!(d.exit_price_cents, 0);
    }

    #[test]
    fn expired_without_result_waits() {
        let pos = open_position(StrategyKind::VolEdge, Side::Yes, 50);
        let mut m = market(85, 88, -10);
        m.status = MarketStatus::Closed;
        assert!(evaluate_exit(&pos, &m, None, &cfg(), Utc::now()).is_none());
    }

    #[test]
    fn weather_take_profit_is_inclusive_at_threshold() {
        let pos = open_position(StrategyKind::Weather, Side::Yes, 12);
        let d = evaluate_exit(&pos, &market(45, 47, 300), None, &cfg(), Utc::now()).unwrap();
        assert_eq!(d.kind, ExitKind::TakeProfit);
        assert_eq!(d.exit_price_cents, 45);

        assert!(evaluate_exit(&pos, &market(44, 46, 300), None, &cfg(), Utc::now()).is_none());
    }

    #[test]
    fn vol_take_profit_per_side() {
        let yes = open_position(StrategyKind::VolEdge, Side::Yes, 50);
        let d = evaluate_exit(&yes, &market(80, 83, 60), None, &cfg(), Utc::now()).unwrap();
        assert_eq!(d.kind, ExitKind::TakeProfit);
        assert_eq!(d.exit_price_cents, 80);

        let no = open_position(StrategyKind::VolEdge, Side::No, 60);
        let d = evaluate_exit(&no, &market(2, 4, 60), None, &cfg(), Utc::now()).unwrap();
        assert_eq!(d.kind, ExitKind::TakeProfit);
        // NO bid synthesized from yes ask
        assert_eq!(d.exit_price_cents, 96);
    }

    #[test]
    fn hard_stop_at_forty_percent() {
        let pos = open_position(StrategyKind::VolEdge, Side::Yes, 50);
        // bid 30: down 40% of entry, stop fires
        let d = evaluate_exit(&pos, &market(30, 33, 60), None, &cfg(), Utc::now()).unwrap();
        assert_eq!(d.kind, ExitKind::StopLoss);
        assert_eq!(d.exit_price_cents, 30);

        // bid 31: down 38%, holds
        assert!(evaluate_exit(&pos, &market(31, 34, 60), None, &cfg(), Utc::now()).is_none());
    }

    #[test]
    fn edge_flip_stop_needs_loss_and_flipped_model() {
        let pos = open_position(StrategyKind::VolEdge, Side::Yes, 50);
        let m = market(40, 43, 10); // down 20%, near expiry
        let c = cfg();

        // model collapsed to 5%: edge deeply negative, stop fires
        let flipped = FixedModel(0.05);
        let d = evaluate_exit(&pos, &m, Some(&flipped), &c, Utc::now()).unwrap();
        assert_eq!(d.kind, ExitKind::StopLoss);

        // model still supportive: no stop
        let supportive = FixedModel(0.60);
        assert!(evaluate_exit(&pos, &m, Some(&supportive), &c, Utc::now()).is_none());

        // flipped model but position in profit: no stop
        let profitable = market(55, 58, 10);
        assert!(evaluate_exit(&pos, &profitable, Some(&flipped), &c, Utc::now()).is_none());
    }

    #[test]
    fn edge_flip_tolerance_decays_with_time() {
        let pos = open_position(StrategyKind::VolEdge, Side::Yes, 50);
        let c = cfg();
        // edge is -6.5%: inside the full 8% tolerance far from expiry,
        // outside the decayed tolerance close to it
        let model = FixedModel(0.365);

        let far = market(43, 43, 2880); // tolerance = min_edge, capped
        assert!(evaluate_exit(&pos, &far, Some(&model), &c, Utc::now()).is_none());

        let near = market(43, 43, 60); // tolerance ~ 8% * sqrt(60/1440) = 1.6%
        let d = evaluate_exit(&pos, &near, Some(&model), &c, Utc::now()).unwrap();
        assert_eq!(d.kind, ExitKind::StopLoss);
    }
}
