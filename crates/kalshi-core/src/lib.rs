//! Kalshi Core Library
//!
//! Shared domain types, the Kalshi API client, and database models for the
//! risk-managed trading bot.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use error::{Error, Result};
