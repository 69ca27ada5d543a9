//! RegimeLab Runner: backtest orchestration, metrics and batch runs.
//!
//! This crate builds on `regimelab-core` to provide:
//! - TOML configuration loading with validation
//! - Single-backtest runner with metrics and fingerprints
//! - Performance analytics (returns, drawdown, Sharpe/Sortino, trade stats)
//! - Parallel batch runs over independent engines

pub mod batch;
pub mod config;
pub mod metrics;
pub mod runner;

pub use batch::{run_batch, BatchJob, BatchSummary, JobOutcome, JobStatus};
pub use config::{load_config, BacktestConfig, LoadError};
pub use metrics::PerformanceMetrics;
pub use runner::{run_single, BacktestResult, RunError};
