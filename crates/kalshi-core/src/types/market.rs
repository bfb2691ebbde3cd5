//! Kalshi market contract metadata, normalized for strategy use.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a market on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    /// Trading closed, awaiting settlement.
    Closed,
    /// Settled with a terminal result.
    Settled,
}

impl MarketStatus {
    /// Parse the exchange's status string. Kalshi reports several variants
    /// for terminal states ("settled", "finalized").
    pub fn parse(s: &str) -> Self {
        match s {
            "settled" | "finalized" => Self::Settled,
            "closed" => Self::Closed,
            _ => Self::Open,
        }
    }
}

/// Terminal outcome of a settled market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketResult {
    Yes,
    No,
}

/// Which side of a binary contract a trade takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }

    /// Settlement value in cents for a holder of this side given the result.
    pub fn settlement_cents(&self, result: MarketResult) -> i64 {
        match (self, result) {
            (Side::Yes, MarketResult::Yes) | (Side::No, MarketResult::No) => 100,
            _ => 0,
        }
    }
}

/// A normalized exchange contract: ticker, strike bounds, expiration and the
/// current top-of-book quote. Prices are integer cents (valid range 1-99).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Unique contract identifier.
    pub ticker: String,
    /// Series this contract belongs to (e.g. KXBTC, KXHIGHNY).
    pub series_ticker: String,
    /// Lower strike bound. `None` means open-ended below.
    pub floor_strike: Option<Decimal>,
    /// Upper strike bound. `None` means open-ended above.
    pub cap_strike: Option<Decimal>,
    /// When trading closes and the contract expires.
    pub close_time: DateTime<Utc>,
    pub yes_bid: i64,
    pub yes_ask: i64,
    pub no_bid: i64,
    pub no_ask: i64,
    pub volume: i64,
    pub status: MarketStatus,
    /// Terminal result, present once settled.
    pub result: Option<MarketResult>,
}

impl Market {
    /// A quote is valid when both sides are inside (0, 100) and bid < ask.
    pub fn has_valid_quote(&self) -> bool {
        self.yes_bid > 0 && self.yes_ask < 100 && self.yes_bid < self.yes_ask
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.close_time
    }

    pub fn minutes_to_close(&self, now: DateTime<Utc>) -> f64 {
        (self.close_time - now).num_seconds() as f64 / 60.0
    }

    /// Bid-ask spread on the YES side, in cents.
    pub fn spread_cents(&self) -> i64 {
        self.yes_ask - self.yes_bid
    }

    /// Execution price in cents for buying the given side. The NO ask is
    /// synthesized from the YES bid when the book does not quote it directly.
    pub fn ask_for(&self, side: Side) -> i64 {
        match side {
            Side::Yes => self.yes_ask,
            Side::No => {
                if self.no_ask > 0 && self.no_ask < 100 {
                    self.no_ask
                } else {
                    100 - self.yes_bid
                }
            }
        }
    }

    /// Best bid in cents for selling the given side back.
    pub fn bid_for(&self, side: Side) -> i64 {
        match side {
            Side::Yes => self.yes_bid,
            Side::No => {
                if self.no_bid > 0 {
                    self.no_bid
                } else {
                    100 - self.yes_ask
                }
            }
        }
    }

    /// True when a forecast value lands inside this contract's strike bucket.
    /// Open-ended bounds match anything on that side.
    pub fn bucket_contains(&self, value: Decimal) -> bool {
        let above_floor = self.floor_strike.map_or(true, |f| value >= f);
        let below_cap = self.cap_strike.map_or(true, |c| value <= c);
        above_floor && below_cap
    }
}
