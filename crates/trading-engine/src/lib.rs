//! Trading Engine
//!
//! Turns signals into risk-checked positions and manages them to exit:
//! decision engine, position lifecycle, execution sinks, exit rules, and
//! the per-strategy cycle scheduler.

pub mod decision;
pub mod executor;
pub mod exit_rules;
pub mod position_manager;
pub mod scheduler;

pub use decision::DecisionEngine;
pub use executor::{ExecutionSink, LiveSink, PaperSink};
pub use exit_rules::{evaluate_exit, ExitDecision};
pub use position_manager::{EntryOutcome, ExitSummary, PositionManager};
pub use scheduler::StrategyRunner;
