//! Core domain types for the trading bot.

pub mod cycle;
pub mod market;
pub mod position;
pub mod recommendation;
pub mod signal;

pub use cycle::*;
pub use market::*;
pub use position::*;
pub use recommendation::*;
pub use signal::*;
