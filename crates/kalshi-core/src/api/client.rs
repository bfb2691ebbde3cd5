//! Kalshi REST client.
//!
//! Wraps the trade API v2: market discovery via the events endpoint with
//! cursor pagination, portfolio queries, and order placement. All
//! authenticated calls sign `timestamp + METHOD + path` with [`KalshiAuth`].

use crate::api::{KalshiAuth, MarketCatalog, MarketSelector};
use crate::types::{Market, MarketResult, MarketStatus, Side};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};
use uuid::Uuid;

const API_PREFIX: &str = "/trade-api/v2";

/// Result of a filled or resting order.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub price_cents: i64,
    pub quantity: i64,
}

/// Authenticated Kalshi trade API client.
pub struct KalshiClient {
    base_url: String,
    auth: KalshiAuth,
    http_client: reqwest::Client,
}

impl KalshiClient {
    /// Maximum retry attempts for idempotent GET calls.
    const MAX_RETRIES: u32 = 3;
    /// Page size for cursor pagination.
    const PAGE_LIMIT: u32 = 200;

    pub fn new(base_url: impl Into<String>, auth: KalshiAuth) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(30))
            .connect_timeout(StdDuration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            auth,
            http_client,
        })
    }

    /// Signed GET with retry on 429 and 5xx. The signature covers the path
    /// without the query string.
    async fn get_with_retry(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 0..Self::MAX_RETRIES {
            let headers = self.auth.sign("GET", path)?;
            let mut req = self.http_client.get(&url).query(query);
            for (name, value) in headers.as_tuples() {
                req = req.header(name, value);
            }
            match req.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if response.status().as_u16() == 429 || response.status().is_server_error() =>
                {
                    let status = response.status();
                    warn!(
                        attempt = attempt + 1,
                        status = %status,
                        path = path,
                        "Retryable API error, backing off"
                    );
                    last_error = Some(Error::Api {
                        message: format!("server error: {status}"),
                        status: Some(status.as_u16()),
                    });
                    if attempt + 1 < Self::MAX_RETRIES {
                        let backoff = if status.as_u16() == 429 {
                            StdDuration::from_millis(2000 * 2u64.pow(attempt))
                        } else {
                            StdDuration::from_millis(500 * 2u64.pow(attempt))
                        };
                        tokio::time::sleep(backoff).await;
                    }
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::Api {
                        message: format!("request failed: {body}"),
                        status: Some(status),
                    });
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, path = path, "HTTP error");
                    last_error = Some(Error::Http(e));
                    if attempt + 1 < Self::MAX_RETRIES {
                        tokio::time::sleep(StdDuration::from_millis(500 * 2u64.pow(attempt)))
                            .await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(Error::Api {
            message: "retries exhausted".to_string(),
            status: None,
        }))
    }

    async fn post_signed<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let headers = self.auth.sign("POST", path)?;
        let mut req = self.http_client.post(&url).json(body);
        for (name, value) in headers.as_tuples() {
            req = req.header(name, value);
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Order {
                message: format!("order rejected [{status}]: {body}"),
            });
        }
        Ok(response)
    }

    /// Available balance in dollars.
    pub async fn get_balance(&self) -> Result<Decimal> {
        let path = format!("{API_PREFIX}/portfolio/balance");
        let resp = self.get_with_retry(&path, &[]).await?;
        let body: BalanceResponse = resp.json().await?;
        Ok(Decimal::new(body.balance, 2))
    }

    /// Current exchange-side positions, for reconciliation against local
    /// state.
    pub async fn get_positions(&self) -> Result<Vec<ExchangePosition>> {
        let path = format!("{API_PREFIX}/portfolio/positions");
        let resp = self.get_with_retry(&path, &[]).await?;
        let body: PositionsResponse = resp.json().await?;
        Ok(body.market_positions)
    }

    /// Open markets for the selector, via the events endpoint with nested
    /// markets. Follows the pagination cursor until exhausted.
    pub async fn get_markets(&self, selector: &MarketSelector) -> Result<Vec<Market>> {
        let path = format!("{API_PREFIX}/events");
        let mut markets = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("status", "open".to_string()),
                ("limit", Self::PAGE_LIMIT.to_string()),
                ("with_nested_markets", "true".to_string()),
            ];
            if let MarketSelector::Series(s) = selector {
                query.push(("series_ticker", s.clone()));
            }
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let resp = self.get_with_retry(&path, &query).await?;
            let body: EventsResponse = resp.json().await?;
            if body.events.is_empty() {
                break;
            }

            for event in &body.events {
                if !selector.matches(&event.series_ticker) {
                    continue;
                }
                for raw in &event.markets {
                    if seen.insert(raw.ticker.clone()) {
                        match raw.to_market(&event.series_ticker) {
                            Ok(m) => markets.push(m),
                            Err(e) => debug!(ticker = %raw.ticker, error = %e, "skipping market"),
                        }
                    }
                }
            }

            cursor = body.cursor.filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        Ok(markets)
    }

    /// Fetch a single market by ticker.
    pub async fn get_market(&self, ticker: &str) -> Result<Market> {
        let path = format!("{API_PREFIX}/markets/{ticker}");
        let resp = self.get_with_retry(&path, &[]).await?;
        let body: MarketResponse = resp.json().await?;
        // series is the ticker up to the first hyphen
        let series = ticker.split('-').next().unwrap_or(ticker).to_string();
        body.market.to_market(&series)
    }

    /// Place a resting limit buy at the given price.
    pub async fn place_limit_buy(
        &self,
        ticker: &str,
        side: Side,
        price_cents: i64,
        quantity: i64,
    ) -> Result<OrderFill> {
        let path = format!("{API_PREFIX}/portfolio/orders");
        let order = OrderRequest::limit_buy(ticker, side, price_cents, quantity);
        let resp = self.post_signed(&path, &order).await?;
        let body: OrderResponse = resp.json().await?;
        Ok(OrderFill {
            order_id: body.order.order_id,
            ticker: ticker.to_string(),
            side,
            price_cents,
            quantity,
        })
    }

    /// Market-sell an existing position, priced 2c under the bid to
    /// guarantee a fill rather than resting on the book.
    pub async fn close_position(
        &self,
        ticker: &str,
        side: Side,
        quantity: i64,
        bid_cents: i64,
    ) -> Result<OrderFill> {
        let path = format!("{API_PREFIX}/portfolio/orders");
        let price_cents = (bid_cents - 2).max(1);
        let order = OrderRequest::market_sell(ticker, side, price_cents, quantity);
        let resp = self.post_signed(&path, &order).await?;
        let body: OrderResponse = resp.json().await?;
        Ok(OrderFill {
            order_id: body.order.order_id,
            ticker: ticker.to_string(),
            side,
            price_cents,
            quantity,
        })
    }
}

#[async_trait]
impl MarketCatalog for KalshiClient {
    async fn refresh(&self, selector: &MarketSelector) -> Result<Vec<Market>> {
        self.get_markets(selector).await
    }

    async fn quote(&self, ticker: &str) -> Result<Market> {
        self.get_market(ticker).await
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: i64,
}

/// Exchange-side position row, used during recovery reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangePosition {
    pub ticker: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub market_exposure: i64,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    market_positions: Vec<ExchangePosition>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<RawEvent>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    series_ticker: String,
    #[serde(default)]
    markets: Vec<RawMarket>,
}

#[derive(Debug, Deserialize)]
struct MarketResponse {
    market: RawMarket,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    ticker: String,
    #[serde(default)]
    yes_bid: i64,
    #[serde(default)]
    yes_ask: i64,
    #[serde(default)]
    no_bid: i64,
    #[serde(default)]
    no_ask: i64,
    #[serde(default)]
    volume: i64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    result: String,
    close_time: Option<DateTime<Utc>>,
    floor_strike: Option<Decimal>,
    cap_strike: Option<Decimal>,
}

impl RawMarket {
    fn to_market(&self, series_ticker: &str) -> Result<Market> {
        let close_time = self.close_time.ok_or_else(|| {
            Error::InvalidMarket(format!("{}: missing close_time", self.ticker))
        })?;
        let result = match self.result.as_str() {
            "yes" => Some(MarketResult::Yes),
            "no" => Some(MarketResult::No),
            _ => None,
        };
        Ok(Market {
            ticker: self.ticker.clone(),
            series_ticker: series_ticker.to_string(),
            floor_strike: self.floor_strike,
            cap_strike: self.cap_strike,
            close_time,
            yes_bid: self.yes_bid,
            yes_ask: self.yes_ask,
            no_bid: self.no_bid,
            no_ask: self.no_ask,
            volume: self.volume,
            status: MarketStatus::parse(&self.status),
            result,
        })
    }
}

#[derive(Debug, Serialize)]
struct OrderRequest {
    ticker: String,
    action: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    side: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_price: Option<i64>,
    count: i64,
    client_order_id: String,
}

impl OrderRequest {
    fn new(
        ticker: &str,
        action: &'static str,
        order_type: &'static str,
        side: Side,
        price_cents: i64,
        count: i64,
    ) -> Self {
        let (yes_price, no_price) = match side {
            Side::Yes => (Some(price_cents), None),
            Side::No => (None, Some(price_cents)),
        };
        Self {
            ticker: ticker.to_string(),
            action,
            order_type,
            side: side.as_str(),
            yes_price,
            no_price,
            count,
            client_order_id: Uuid::new_v4().to_string(),
        }
    }

    fn limit_buy(ticker: &str, side: Side, price_cents: i64, count: i64) -> Self {
        Self::new(ticker, "buy", "limit", side, price_cents, count)
    }

    fn market_sell(ticker: &str, side: Side, price_cents: i64, count: i64) -> Self {
        Self::new(ticker, "sell", "market", side, price_cents, count)
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: RawOrder,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    order_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_request_sets_side_price_field() {
        let yes = OrderRequest::limit_buy("KXBTC-TEST", Side::Yes, 40, 2);
        assert_eq!(yes.yes_price, Some(40));
        assert_eq!(yes.no_price, None);
        assert_eq!(yes.action, "buy");
        assert_eq!(yes.order_type, "limit");

        let no = OrderRequest::market_sell("KXBTC-TEST", Side::No, 18, 1);
        assert_eq!(no.no_price, Some(18));
        assert_eq!(no.yes_price, None);
        assert_eq!(no.action, "sell");
    }

    #[test]
    fn raw_market_parses_result_and_status() {
        let raw: RawMarket = serde_json::from_str(
            r#"{
                "ticker": "KXBTC-25AUG30-B110000",
                "yes_bid": 40,
                "yes_ask": 43,
                "volume": 1200,
                "status": "settled",
                "result": "yes",
                "close_time": "2025-08-30T17:00:00Z",
                "floor_strike": 109999.99,
                "cap_strike": 110999.99
            }"#,
        )
        .unwrap();
        let market = raw.to_market("KXBTC").unwrap();
        assert_eq!(market.status, MarketStatus::Settled);
        assert_eq!(market.result, Some(MarketResult::Yes));
        assert_eq!(market.series_ticker, "KXBTC");
        // unquoted NO side defaults to zero
        assert_eq!(market.no_bid, 0);
    }

    #[test]
    fn missing_close_time_is_invalid() {
        let raw: RawMarket =
            serde_json::from_str(r#"{"ticker": "KXBTC-X", "status": "open"}"#).unwrap();
        assert!(raw.to_market("KXBTC").is_err());
    }

    #[test]
    fn close_price_floors_at_one_cent() {
        let price = (2i64 - 2).max(1);
        assert_eq!(price, 1);
    }
}
