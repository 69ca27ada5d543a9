//! Per-bar outcomes and the final run result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::state::Diagnostics;
use crate::allocator::{AllocationSnapshot, TierStats};
use crate::components::Signal;
use crate::domain::{EquityPoint, Position, PositionId, TradeRecord};
use crate::error::{ConfigError, EngineError};
use crate::fingerprint::RunFingerprint;
use crate::regime::Regime;

/// Regime observed on one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeMark {
    pub timestamp: DateTime<Utc>,
    /// Window classification before smoothing.
    pub raw: Regime,
    pub regime: Regime,
}

/// What happened while processing a single bar.
#[derive(Debug, Clone, PartialEq)]
pub struct BarOutcome {
    pub bar_index: usize,
    pub regime: RegimeMark,
    pub signal: Signal,
    /// Trade-log entries appended on this bar.
    pub exits: Vec<TradeRecord>,
    pub opened: Option<PositionId>,
    /// Why an actionable signal did not open a position, if it was rejected.
    pub rejection: Option<EngineError>,
    pub equity: f64,
    pub reallocated: bool,
}

/// Complete output of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub trades: Vec<TradeRecord>,
    /// One point per processed bar.
    pub equity_curve: Vec<EquityPoint>,
    /// Empty after a finished run; populated in partial results.
    pub open_positions: Vec<Position>,
    pub regimes: Vec<RegimeMark>,
    pub allocation_history: Vec<AllocationSnapshot>,
    pub tier_weights: BTreeMap<String, f64>,
    pub tier_stats: BTreeMap<String, TierStats>,
    pub diagnostics: Diagnostics,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub fingerprint: RunFingerprint,
}

impl RunResult {
    pub fn bar_count(&self) -> usize {
        self.equity_curve.len()
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.realized_pnl).sum()
    }

    /// Trade records that closed their position (partials excluded).
    pub fn closed_trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter().filter(|t| !t.is_partial)
    }
}

/// A run stopped by a fatal error. `partial` is the state after the last
/// fully processed bar; nothing is rolled back or force-closed.
#[derive(Debug, Clone, Error)]
#[error("run aborted at bar {bar_index}: {error}")]
pub struct AbortedRun {
    pub bar_index: usize,
    pub error: EngineError,
    pub partial: Box<RunResult>,
}

#[derive(Debug, Clone, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Aborted(#[from] AbortedRun),
}

impl BacktestError {
    /// The partial result, when the run got far enough to have one.
    pub fn partial(&self) -> Option<&RunResult> {
        match self {
            Self::Config(_) => None,
            Self::Aborted(a) => Some(&a.partial),
        }
    }
}
