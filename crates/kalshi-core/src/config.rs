//! Configuration management for the trading system.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub kalshi: KalshiConfig,
    pub risk: RiskConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiConfig {
    pub api_base: String,
    pub access_key: Option<String>,
    /// PEM-encoded RSA private key for request signing.
    pub private_key_pem: Option<String>,
    /// When false, orders are simulated locally instead of sent to the
    /// exchange.
    pub live_trading: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Maximum capital committed to a single trade, dollars.
    pub per_trade_cap: Decimal,
    /// Maximum total committed capital across open positions, dollars.
    pub total_capital: Decimal,
    /// Realized-loss threshold that halts new entries for the rest of the
    /// UTC day, dollars. Required; there is no safe default.
    pub daily_loss_limit: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Minimum model-vs-price edge to enter a probabilistic trade.
    pub min_edge: f64,
    /// Deterministic strategy entry ceiling: skip when ask >= this, cents.
    pub det_entry_cents: i64,
    /// Deterministic strategy take-profit floor: close when bid >= this, cents.
    pub det_take_profit_cents: i64,
    /// Adverse move fraction that triggers the stop-loss.
    pub stop_loss_pct: f64,
    /// Minimum minutes to market close for a probabilistic entry.
    pub vol_min_horizon_mins: f64,
    /// Minimum minutes to market close for a deterministic entry.
    pub weather_min_horizon_mins: f64,
    /// Seconds between execution cycles.
    pub tick_secs: u64,
    /// Maximum new entries per cycle.
    pub max_trades_per_cycle: u32,
    /// Signal freshness window, seconds.
    pub signal_freshness_secs: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let cfg = Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| Error::Config {
                    message: "DATABASE_URL environment variable not set".to_string(),
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            },
            kalshi: KalshiConfig {
                api_base: env::var("KALSHI_API_BASE")
                    .unwrap_or_else(|_| "https://api.elections.kalshi.com".to_string()),
                access_key: env::var("KALSHI_ACCESS_KEY").ok(),
                private_key_pem: env::var("KALSHI_PRIVATE_KEY_PEM").ok(),
                live_trading: env::var("LIVE_TRADING")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
            },
            risk: RiskConfig {
                per_trade_cap: parse_decimal("PER_TRADE_CAP", "1.00")?,
                total_capital: parse_decimal("TOTAL_CAPITAL", "1000.00")?,
                daily_loss_limit: env::var("DAILY_LOSS_LIMIT")
                    .map_err(|_| Error::Config {
                        message: "DAILY_LOSS_LIMIT environment variable not set".to_string(),
                    })?
                    .parse()
                    .map_err(|_| Error::Config {
                        message: "DAILY_LOSS_LIMIT is not a valid dollar amount".to_string(),
                    })?,
            },
            engine: EngineConfig {
                min_edge: parse_f64("MIN_EDGE", 0.08)?,
                det_entry_cents: parse_i64("DET_ENTRY_CENTS", 15)?,
                det_take_profit_cents: parse_i64("DET_TAKE_PROFIT_CENTS", 45)?,
                stop_loss_pct: parse_f64("STOP_LOSS_PCT", 0.40)?,
                vol_min_horizon_mins: parse_f64("VOL_MIN_HORIZON_MINS", 5.0)?,
                weather_min_horizon_mins: parse_f64("WEATHER_MIN_HORIZON_MINS", 120.0)?,
                tick_secs: env::var("TICK_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
                max_trades_per_cycle: env::var("MAX_TRADES_PER_CYCLE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                signal_freshness_secs: parse_i64("SIGNAL_FRESHNESS_SECS", 300)?,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.risk.per_trade_cap <= Decimal::ZERO
            || self.risk.total_capital <= Decimal::ZERO
            || self.risk.daily_loss_limit <= Decimal::ZERO
        {
            return Err(Error::Config {
                message: "risk limits must be positive dollar amounts".to_string(),
            });
        }
        if self.risk.per_trade_cap > self.risk.total_capital {
            return Err(Error::Config {
                message: "PER_TRADE_CAP exceeds TOTAL_CAPITAL".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.engine.min_edge) {
            return Err(Error::Config {
                message: "MIN_EDGE must be in [0, 1)".to_string(),
            });
        }
        if !(1..100).contains(&self.engine.det_entry_cents)
            || !(1..100).contains(&self.engine.det_take_profit_cents)
        {
            return Err(Error::Config {
                message: "price thresholds must be in 1..=99 cents".to_string(),
            });
        }
        if self.engine.vol_min_horizon_mins < 0.0 || self.engine.weather_min_horizon_mins < 0.0 {
            return Err(Error::Config {
                message: "expiry horizons must be non-negative minutes".to_string(),
            });
        }
        if self.kalshi.live_trading
            && (self.kalshi.access_key.is_none() || self.kalshi.private_key_pem.is_none())
        {
            return Err(Error::Config {
                message: "LIVE_TRADING requires KALSHI_ACCESS_KEY and KALSHI_PRIVATE_KEY_PEM"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Configuration for testing (with defaults).
    pub fn test_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/kalshi_bot_test".to_string(),
                max_connections: 2,
            },
            kalshi: KalshiConfig {
                api_base: "https://demo-api.kalshi.co".to_string(),
                access_key: None,
                private_key_pem: None,
                live_trading: false,
            },
            risk: RiskConfig {
                per_trade_cap: Decimal::new(100, 2),
                total_capital: Decimal::new(100_000, 2),
                daily_loss_limit: Decimal::new(5_000, 2),
            },
            engine: EngineConfig {
                min_edge: 0.08,
                det_entry_cents: 15,
                det_take_profit_cents: 45,
                stop_loss_pct: 0.40,
                vol_min_horizon_mins: 5.0,
                weather_min_horizon_mins: 120.0,
                tick_secs: 120,
                max_trades_per_cycle: 3,
                signal_freshness_secs: 300,
            },
        }
    }
}

fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| Error::Config {
            message: format!("{key} is not a valid dollar amount"),
        })
}

fn parse_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| Error::Config {
            message: format!("{key} is not a valid number"),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| Error::Config {
            message: format!("{key} is not a valid integer"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_valid() {
        let cfg = Config::test_config();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn per_trade_cap_cannot_exceed_total() {
        let mut cfg = Config::test_config();
        cfg.risk.per_trade_cap = cfg.risk.total_capital + Decimal::ONE;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn live_trading_requires_credentials() {
        let mut cfg = Config::test_config();
        cfg.kalshi.live_trading = true;
        assert!(cfg.validate().is_err());
    }
}
