//! Execution sinks: where approved orders actually go.
//!
//! The live sink forwards to the exchange; the paper sink fills instantly
//! against the quoted price and tracks holdings in memory. Everything above
//! this seam is identical in both modes.

use async_trait::async_trait;
use dashmap::DashMap;
use kalshi_core::api::{KalshiClient, OrderFill};
use kalshi_core::types::Side;
use kalshi_core::Result;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Order placement seam between the position manager and the exchange.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Place a limit buy. An `Err` means the entry did not happen.
    async fn place(&self, ticker: &str, side: Side, price_cents: i64, quantity: i64)
        -> Result<OrderFill>;

    /// Sell out of an existing holding at the current bid.
    async fn close(&self, ticker: &str, side: Side, quantity: i64, bid_cents: i64)
        -> Result<OrderFill>;
}

/// Paper-trading sink: every order fills immediately at its limit price.
#[derive(Default)]
pub struct PaperSink {
    /// Contracts held per (ticker, side), for parity with live holdings.
    holdings: DashMap<(String, Side), i64>,
}

impl PaperSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holding(&self, ticker: &str, side: Side) -> i64 {
        self.holdings
            .get(&(ticker.to_string(), side))
            .map(|h| *h)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ExecutionSink for PaperSink {
    async fn place(
        &self,
        ticker: &str,
        side: Side,
        price_cents: i64,
        quantity: i64,
    ) -> Result<OrderFill> {
        *self
            .holdings
            .entry((ticker.to_string(), side))
            .or_insert(0) += quantity;
        info!(
            ticker = ticker,
            side = side.as_str(),
            price_cents = price_cents,
            quantity = quantity,
            "[PAPER] buy filled"
        );
        Ok(OrderFill {
            order_id: Uuid::new_v4().to_string(),
            ticker: ticker.to_string(),
            side,
            price_cents,
            quantity,
        })
    }

    async fn close(
        &self,
        ticker: &str,
        side: Side,
        quantity: i64,
        bid_cents: i64,
    ) -> Result<OrderFill> {
        if let Some(mut h) = self.holdings.get_mut(&(ticker.to_string(), side)) {
            *h -= quantity;
        }
        info!(
            ticker = ticker,
            side = side.as_str(),
            bid_cents = bid_cents,
            quantity = quantity,
            "[PAPER] sell filled"
        );
        Ok(OrderFill {
            order_id: Uuid::new_v4().to_string(),
            ticker: ticker.to_string(),
            side,
            price_cents: bid_cents,
            quantity,
        })
    }
}

/// Live sink backed by the exchange client.
pub struct LiveSink {
    client: Arc<KalshiClient>,
}

impl LiveSink {
    pub fn new(client: Arc<KalshiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecutionSink for LiveSink {
    async fn place(
        &self,
        ticker: &str,
        side: Side,
        price_cents: i64,
        quantity: i64,
    ) -> Result<OrderFill> {
        self.client
            .place_limit_buy(ticker, side, price_cents, quantity)
            .await
    }

    async fn close(
        &self,
        ticker: &str,
        side: Side,
        quantity: i64,
        bid_cents: i64,
    ) -> Result<OrderFill> {
        self.client
            .close_position(ticker, side, quantity, bid_cents)
            .await
    }
}
