//! Risk Manager
//!
//! The capital guardrail every trade entry must pass through. Enforces the
//! per-trade cap, the total exposure ceiling, and the daily realized-loss
//! halt via a check-then-commit reservation ledger.

pub mod guardrail;

pub use guardrail::{Authorization, LedgerSnapshot, RejectReason, RiskGuardrail};
