//! Client for the US National Weather Service (NOAA) API.
//!
//! Two-step protocol: `/points/{lat},{lon}` resolves coordinates to a grid
//! forecast URL, which then serves day/night periods. Grid URLs are stable
//! per location, so they are cached for the process lifetime.

use crate::weather::{ForecastSource, Location};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use kalshi_core::Result;
use serde::Deserialize;
use tracing::debug;

const NOAA_API_BASE: &str = "https://api.weather.gov";
const USER_AGENT: &str = "kalshi-weather-bot/1.0";

/// Async NOAA forecast client with a per-location grid URL cache.
pub struct NoaaClient {
    http_client: reqwest::Client,
    base_url: String,
    grid_cache: DashMap<&'static str, String>,
}

#[derive(Debug, Deserialize)]
struct PointsResponse {
    properties: PointsProperties,
}

#[derive(Debug, Deserialize)]
struct PointsProperties {
    forecast: String,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    properties: ForecastProperties,
}

#[derive(Debug, Deserialize)]
struct ForecastProperties {
    #[serde(default)]
    periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastPeriod {
    start_time: String,
    temperature: i64,
    #[serde(default = "default_daytime")]
    is_daytime: bool,
}

fn default_daytime() -> bool {
    true
}

impl NoaaClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(NOAA_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .user_agent(USER_AGENT)
                .build()?,
            base_url: base_url.into(),
            grid_cache: DashMap::new(),
        })
    }

    async fn forecast_url(&self, location: &Location) -> Result<String> {
        if let Some(url) = self.grid_cache.get(location.code) {
            return Ok(url.clone());
        }

        let points_url = format!("{}/points/{},{}", self.base_url, location.lat, location.lon);
        let resp = self.http_client.get(&points_url).send().await?;
        let body: PointsResponse = resp.error_for_status()?.json().await?;

        debug!(location = location.code, url = %body.properties.forecast, "resolved NOAA grid");
        self.grid_cache
            .insert(location.code, body.properties.forecast.clone());
        Ok(body.properties.forecast)
    }
}

#[async_trait]
impl ForecastSource for NoaaClient {
    async fn daily_high(&self, location: &Location, date: NaiveDate) -> Result<Option<i64>> {
        let url = self.forecast_url(location).await?;
        let resp = self.http_client.get(&url).send().await?;
        let body: ForecastResponse = resp.error_for_status()?.json().await?;

        // Daytime period temperature is the forecast high for that date.
        let wanted = date.format("%Y-%m-%d").to_string();
        let high = body
            .properties
            .periods
            .iter()
            .find(|p| p.is_daytime && p.start_time.starts_with(&wanted))
            .map(|p| p.temperature);
        Ok(high)
    }
}
