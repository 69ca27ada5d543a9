//! Backtest runner: wires together config, engine, and metrics.
//!
//! One entry point, `run_single()`: takes pre-loaded bars, runs the engine
//! to completion and attaches metrics and fingerprints. Loading bars is the
//! caller's job.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use regimelab_core::domain::Bar;
use regimelab_core::engine::{run_backtest, AbortedRun, BacktestError, RunResult};
use regimelab_core::error::ConfigError;
use regimelab_core::fingerprint::RunFingerprint;

use crate::config::BacktestConfig;
use crate::metrics::PerformanceMetrics;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Aborted(#[from] AbortedRun),
    #[error("no bars supplied for '{0}'")]
    NoBars(String),
    #[error("{configured} secondary timeframes configured but {supplied} streams supplied")]
    TimeframeMismatch { configured: usize, supplied: usize },
}

impl From<BacktestError> for RunError {
    fn from(err: BacktestError) -> Self {
        match err {
            BacktestError::Config(e) => Self::Config(e),
            BacktestError::Aborted(a) => Self::Aborted(a),
        }
    }
}

impl RunError {
    /// Bar index of a fatal engine error, if the run got that far.
    pub fn aborted_at(&self) -> Option<usize> {
        match self {
            Self::Aborted(a) => Some(a.bar_index),
            _ => None,
        }
    }
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub name: String,
    pub symbol: String,
    pub metrics: PerformanceMetrics,
    pub run: RunResult,
    pub fingerprint: RunFingerprint,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestResult {
    pub fn net_pnl(&self) -> f64 {
        self.run.total_realized_pnl()
    }
}

/// Run one backtest over pre-loaded bars.
///
/// `secondary` must hold one stream per configured secondary timeframe, in
/// configuration order.
pub fn run_single(
    config: &BacktestConfig,
    bars: &[Bar],
    secondary: &[Vec<Bar>],
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    if bars.is_empty() {
        return Err(RunError::NoBars(config.symbol.clone()));
    }
    let configured = config.engine.timeframes.len();
    if secondary.len() != configured {
        return Err(RunError::TimeframeMismatch {
            configured,
            supplied: secondary.len(),
        });
    }

    let run = run_backtest(&config.engine, bars, secondary)?;
    let metrics =
        PerformanceMetrics::compute(&run.trades, &run.equity_curve, config.periods_per_year);
    info!(
        name = %config.name,
        symbol = %config.symbol,
        trades = metrics.trade_count,
        total_return = metrics.total_return,
        sharpe = metrics.sharpe,
        run_id = %run.fingerprint.run_id,
        "backtest complete"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        name: config.name.clone(),
        symbol: config.symbol.clone(),
        fingerprint: run.fingerprint.clone(),
        metrics,
        run,
    })
}
