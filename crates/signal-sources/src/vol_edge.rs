//! GBM volatility model for BTC range markets.
//!
//! Probability that spot lands inside a strike range at expiry, from the
//! no-drift lognormal terminal distribution. Volatility comes from a rolling
//! window of spot samples, falling back to a long-run BTC baseline until the
//! window has enough history.

use crate::SignalSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kalshi_core::types::{Market, ProbabilityModel, Signal, StrategyKind};
use kalshi_core::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Rolling window length: 30 samples at one per cycle (2 min) = 1h.
const VOL_LOOKBACK: usize = 30;
/// Minimum samples before trusting the realized estimate.
const MIN_VOL_SAMPLES: usize = 5;
/// Annualized baseline volatility used until the window warms up.
const DEFAULT_ANNUAL_VOL: f64 = 0.55;
/// Never assume less than this annualized volatility.
const MIN_ANNUAL_VOL: f64 = 0.20;
/// Minutes in a (non-leap) year, for annual-to-per-minute scaling.
const MINUTES_PER_YEAR: f64 = 525_600.0;
/// Minutes between spot samples.
const SAMPLE_INTERVAL_MINS: f64 = 2.0;

/// Standard normal CDF via the error function.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
}

/// P(spot lands in [floor, cap] at expiry) under a no-drift GBM terminal
/// distribution. `mins <= 0` degenerates to an indicator on the range.
pub fn range_probability(spot: f64, floor: f64, cap: f64, vol_per_min: f64, mins: f64) -> f64 {
    let inside = || {
        if floor <= spot && spot <= cap {
            1.0
        } else {
            0.0
        }
    };
    if mins <= 0.0 {
        return inside();
    }
    let sigma_t = vol_per_min * mins.sqrt();
    if sigma_t < 1e-9 {
        return inside();
    }
    let d_cap = (cap / spot).ln() / sigma_t;
    let d_floor = (floor / spot).ln() / sigma_t;
    (normal_cdf(d_cap) - normal_cdf(d_floor)).clamp(0.0, 1.0)
}

/// Realized-volatility estimator over a rolling window of spot samples.
#[derive(Debug, Clone)]
pub struct VolEstimator {
    prices: VecDeque<f64>,
}

impl Default for VolEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl VolEstimator {
    pub fn new() -> Self {
        Self {
            prices: VecDeque::with_capacity(VOL_LOOKBACK),
        }
    }

    /// Record a spot sample, evicting the oldest once the window is full.
    pub fn record(&mut self, price: f64) {
        if self.prices.len() == VOL_LOOKBACK {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    pub fn samples(&self) -> usize {
        self.prices.len()
    }

    /// How full the window is, in [0, 1]. Used as signal confidence.
    pub fn confidence(&self) -> f64 {
        self.prices.len() as f64 / VOL_LOOKBACK as f64
    }

    /// Per-minute volatility. Falls back to the annual baseline until the
    /// window has at least [`MIN_VOL_SAMPLES`] samples, and is floored at
    /// [`MIN_ANNUAL_VOL`] regardless.
    pub fn vol_per_minute(&self) -> f64 {
        let fallback = DEFAULT_ANNUAL_VOL / MINUTES_PER_YEAR.sqrt();
        if self.prices.len() < MIN_VOL_SAMPLES {
            return fallback;
        }

        let log_returns: Vec<f64> = self
            .prices
            .iter()
            .zip(self.prices.iter().skip(1))
            .filter(|(prev, curr)| **prev > 0.0 && **curr > 0.0)
            .map(|(prev, curr)| (curr / prev).ln())
            .collect();
        if log_returns.len() < 3 {
            return fallback;
        }

        let mean = log_returns.iter().sum::<f64>() / log_returns.len() as f64;
        let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (log_returns.len() - 1) as f64;
        let vol_sample = variance.sqrt();

        let vol_per_min = vol_sample / SAMPLE_INTERVAL_MINS.sqrt();
        let floor = MIN_ANNUAL_VOL / MINUTES_PER_YEAR.sqrt();
        vol_per_min.max(floor)
    }
}

/// Snapshot of the model at one spot/vol point. Used both for entry signals
/// and for re-estimating open positions during exit monitoring.
#[derive(Debug, Clone, Copy)]
pub struct GbmModel {
    pub spot: f64,
    pub vol_per_min: f64,
}

impl GbmModel {
    pub fn new(spot: f64, vol_per_min: f64) -> Self {
        Self { spot, vol_per_min }
    }
}

impl ProbabilityModel for GbmModel {
    /// YES probability for a range market. Markets without both strike
    /// bounds cannot be modeled.
    fn estimate(&self, market: &Market, now: DateTime<Utc>) -> Option<f64> {
        let floor = market.floor_strike?.to_f64()?;
        let cap = market.cap_strike?.to_f64()?;
        if floor <= 0.0 || cap <= floor || self.spot <= 0.0 {
            return None;
        }
        let mins = market.minutes_to_close(now);
        Some(range_probability(
            self.spot,
            floor,
            cap,
            self.vol_per_min,
            mins,
        ))
    }
}

/// Source of a spot price for the underlying.
#[async_trait]
pub trait SpotPriceSource: Send + Sync {
    async fn spot(&self) -> Result<f64>;
}

/// Coinbase spot price endpoint; no auth required.
pub struct CoinbaseSpot {
    http_client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct SpotResponse {
    data: SpotData,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    amount: String,
}

impl CoinbaseSpot {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()?,
            url: "https://api.coinbase.com/v2/prices/BTC-USD/spot".to_string(),
        })
    }
}

#[async_trait]
impl SpotPriceSource for CoinbaseSpot {
    async fn spot(&self) -> Result<f64> {
        let resp = self.http_client.get(&self.url).send().await?;
        let body: SpotResponse = resp.error_for_status()?.json().await?;
        body.data.amount.parse().map_err(|_| Error::Api {
            message: format!("unparseable spot price: {}", body.data.amount),
            status: None,
        })
    }
}

/// Probabilistic signal source for BTC range markets.
pub struct VolEdgeSource {
    spot_source: Box<dyn SpotPriceSource>,
    estimator: VolEstimator,
    /// Last model snapshot, exposed for exit re-estimation.
    model: Option<GbmModel>,
}

impl VolEdgeSource {
    pub fn new(spot_source: Box<dyn SpotPriceSource>) -> Self {
        Self {
            spot_source,
            estimator: VolEstimator::new(),
            model: None,
        }
    }

    /// Model snapshot from the most recent cycle, if a spot fetch has
    /// succeeded yet.
    pub fn model(&self) -> Option<GbmModel> {
        self.model
    }
}

#[async_trait]
impl SignalSource for VolEdgeSource {
    fn strategy(&self) -> StrategyKind {
        StrategyKind::VolEdge
    }

    /// Fetch spot, update the vol window, and emit one probability signal
    /// per modelable market. On spot failure the whole cycle goes without
    /// signals rather than trading on stale data.
    async fn signals(&mut self, markets: &[Market]) -> Result<Vec<Signal>> {
        let spot = match self.spot_source.spot().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "spot price fetch failed, no signals this cycle");
                return Ok(Vec::new());
            }
        };
        self.estimator.record(spot);
        let vol_per_min = self.estimator.vol_per_minute();
        let model = GbmModel::new(spot, vol_per_min);
        self.model = Some(model);

        let annual_vol = vol_per_min * MINUTES_PER_YEAR.sqrt();
        info!(
            spot = spot,
            annual_vol = format!("{:.0}%", annual_vol * 100.0),
            samples = self.estimator.samples(),
            "volatility estimate updated"
        );

        let now = Utc::now();
        let confidence = self.estimator.confidence();
        let mut signals = Vec::new();
        for market in markets {
            match model.estimate(market, now) {
                Some(p) => {
                    signals.push(Signal::probability(
                        market.ticker.clone(),
                        p,
                        confidence,
                        StrategyKind::VolEdge,
                    ));
                }
                None => {
                    debug!(ticker = %market.ticker, "market has no strike range, not modelable");
                }
            }
        }
        Ok(signals)
    }

    fn probability_model(&self) -> Option<Box<dyn ProbabilityModel>> {
        self.model.map(|m| Box::new(m) as Box<dyn ProbabilityModel>)
    }
}
