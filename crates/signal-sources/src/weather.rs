//! Deterministic weather signals from NOAA daily-high forecasts.
//!
//! Temperature bucket markets settle on the official daily high at a city's
//! reporting station. The signal is a plain match: does the NOAA forecast
//! high fall inside the market's strike bucket. No probability estimation.

use crate::SignalSource;
use async_trait::async_trait;
use chrono::NaiveDate;
use kalshi_core::types::{Market, Signal, StrategyKind};
use kalshi_core::Result;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// A city with a daily-high market series and the station coordinates NOAA
/// resolves to its forecast grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// Market series ticker for the city's daily high.
    pub series_ticker: &'static str,
    pub code: &'static str,
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

/// Cities traded by the weather strategy. Coordinates are the reporting
/// airports, which fall inside the right NOAA grid cells.
pub const LOCATIONS: &[Location] = &[
    Location {
        series_ticker: "KXHIGHNY",
        code: "NYC",
        name: "New York City (LaGuardia)",
        lat: 40.7769,
        lon: -73.8740,
    },
    Location {
        series_ticker: "KXHIGHCHI",
        code: "CHI",
        name: "Chicago (O'Hare)",
        lat: 41.9742,
        lon: -87.9073,
    },
    Location {
        series_ticker: "KXHIGHSEA",
        code: "SEA",
        name: "Seattle (Sea-Tac)",
        lat: 47.4502,
        lon: -122.3088,
    },
    Location {
        series_ticker: "KXHIGHATL",
        code: "ATL",
        name: "Atlanta (Hartsfield)",
        lat: 33.6407,
        lon: -84.4277,
    },
    Location {
        series_ticker: "KXHIGHDAL",
        code: "DAL",
        name: "Dallas (DFW)",
        lat: 32.8998,
        lon: -97.0403,
    },
    Location {
        series_ticker: "KXHIGHMIA",
        code: "MIA",
        name: "Miami (MIA)",
        lat: 25.7959,
        lon: -80.2870,
    },
];

/// Look up the traded city for a market series.
pub fn location_for_series(series_ticker: &str) -> Option<&'static Location> {
    LOCATIONS.iter().find(|l| l.series_ticker == series_ticker)
}

/// Forecast provider seam. The live implementation is [`crate::NoaaClient`];
/// tests use fixed tables.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Forecast daily high in degrees Fahrenheit for the location and date,
    /// or `None` when the horizon has no forecast yet.
    async fn daily_high(&self, location: &Location, date: NaiveDate) -> Result<Option<i64>>;
}

/// Deterministic signal source for daily-high temperature markets.
pub struct WeatherSource {
    forecasts: Box<dyn ForecastSource>,
}

impl WeatherSource {
    pub fn new(forecasts: Box<dyn ForecastSource>) -> Self {
        Self { forecasts }
    }
}

#[async_trait]
impl SignalSource for WeatherSource {
    fn strategy(&self) -> StrategyKind {
        StrategyKind::Weather
    }

    /// One deterministic signal per market in a known city. Markets in
    /// unknown series or beyond the forecast horizon get no signal.
    async fn signals(&mut self, markets: &[Market]) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        for market in markets {
            let Some(location) = location_for_series(&market.series_ticker) else {
                debug!(series = %market.series_ticker, "no station mapping for series");
                continue;
            };
            // Dailies settle on the high for the day trading closes.
            let date = market.close_time.date_naive();
            let high = match self.forecasts.daily_high(location, date).await {
                Ok(Some(h)) => h,
                Ok(None) => {
                    debug!(ticker = %market.ticker, %date, "no forecast for date yet");
                    continue;
                }
                Err(e) => {
                    warn!(ticker = %market.ticker, error = %e, "forecast fetch failed");
                    continue;
                }
            };

            let matched = market.bucket_contains(Decimal::from(high));
            signals.push(Signal::deterministic(
                market.ticker.clone(),
                matched,
                StrategyKind::Weather,
            ));
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use kalshi_core::types::{MarketStatus, SignalKind};
    use std::collections::HashMap;

    struct FixedForecasts(HashMap<&'static str, i64>);

    #[async_trait]
    impl ForecastSource for FixedForecasts {
        async fn daily_high(&self, location: &Location, _date: NaiveDate) -> Result<Option<i64>> {
            Ok(self.0.get(location.code).copied())
        }
    }

    fn bucket_market(series: &str, floor: Option<i64>, cap: Option<i64>) -> Market {
        Market {
            ticker: format!("{series}-25AUG30-T70"),
            series_ticker: series.to_string(),
            floor_strike: floor.map(Decimal::from),
            cap_strike: cap.map(Decimal::from),
            close_time: Utc::now() + Duration::hours(8),
            yes_bid: 10,
            yes_ask: 12,
            no_bid: 88,
            no_ask: 90,
            volume: 500,
            status: MarketStatus::Open,
            result: None,
        }
    }

    fn matched(signal: &Signal) -> bool {
        matches!(signal.kind, SignalKind::Deterministic { matched: true })
    }

    #[tokio::test]
    async fn forecast_inside_bucket_matches() {
        let mut source = WeatherSource::new(Box::new(FixedForecasts(HashMap::from([("MIA", 71)]))));
        let markets = vec![
            bucket_market("KXHIGHMIA", Some(70), Some(72)),
            bucket_market("KXHIGHMIA", Some(74), Some(76)),
        ];
        let signals = source.signals(&markets).await.unwrap();
        assert_eq!(signals.len(), 2);
        assert!(matched(&signals[0]));
        assert!(!matched(&signals[1]));
    }

    #[tokio::test]
    async fn open_ended_buckets_match_on_one_bound() {
        let mut source = WeatherSource::new(Box::new(FixedForecasts(HashMap::from([("SEA", 55)]))));
        let markets = vec![
            // "54 or above"
            bucket_market("KXHIGHSEA", Some(54), None),
            // "50 or below"
            bucket_market("KXHIGHSEA", None, Some(50)),
        ];
        let signals = source.signals(&markets).await.unwrap();
        assert!(matched(&signals[0]));
        assert!(!matched(&signals[1]));
    }

    #[tokio::test]
    async fn unknown_series_and_missing_forecast_get_no_signal() {
        let mut source = WeatherSource::new(Box::new(FixedForecasts(HashMap::new())));
        let markets = vec![
            bucket_market("KXBTC", Some(100), Some(110)),
            bucket_market("KXHIGHNY", Some(70), Some(72)),
        ];
        let signals = source.signals(&markets).await.unwrap();
        assert!(signals.is_empty());
    }

    #[test]
    fn all_locations_have_unique_series() {
        let mut seen = std::collections::HashSet::new();
        for loc in LOCATIONS {
            assert!(seen.insert(loc.series_ticker));
        }
        assert!(location_for_series("KXHIGHNY").is_some());
        assert!(location_for_series("KXBTC").is_none());
    }
}
