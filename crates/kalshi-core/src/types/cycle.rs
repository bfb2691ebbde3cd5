use crate::types::StrategyKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit record of one execution cycle for a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub id: Uuid,
    pub strategy: StrategyKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub markets_evaluated: u32,
    pub signals_received: u32,
    pub trades_opened: u32,
    pub positions_closed: u32,
    /// Human-readable skip reasons, one per market skipped.
    pub skips: Vec<String>,
    /// Unit failures that were isolated and logged rather than aborting
    /// the cycle.
    pub errors: Vec<String>,
}

impl CycleRecord {
    pub fn start(strategy: StrategyKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy,
            started_at: Utc::now(),
            finished_at: None,
            markets_evaluated: 0,
            signals_received: 0,
            trades_opened: 0,
            positions_closed: 0,
            skips: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
