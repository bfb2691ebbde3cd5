//! Error types for the trading bot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid market data: {0}")]
    InvalidMarket(String),

    #[error("Position error: {0}")]
    Position(String),

    #[error("Kalshi API error: {message}")]
    Api { message: String, status: Option<u16> },

    #[error("Request signing error: {message}")]
    Signing { message: String },

    #[error("Order error: {message}")]
    Order { message: String },

    /// Capital-safety invariant violation. Halts new entries until reconciled.
    #[error("Ledger inconsistency: {0}")]
    Inconsistency(String),
}

pub type Result<T> = std::result::Result<T, Error>;
