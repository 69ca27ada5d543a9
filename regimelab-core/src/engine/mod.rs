//! Backtesting engine: the bar-by-bar loop plus its state and result types.
//!
//! The engine consumes an ordered bar stream (indicators precomputed
//! upstream) and, per bar, classifies the regime, aggregates signals,
//! manages open positions, enforces the portfolio risk ceiling, sizes new
//! entries and runs the allocator cadence. Processing is single-threaded
//! and deterministic; independent runs share nothing.

pub mod loop_runner;
pub mod result;
pub mod state;

pub use loop_runner::{run_backtest, Engine};
pub use result::{AbortedRun, BacktestError, BarOutcome, RegimeMark, RunResult};
pub use state::{Admission, BarWindow, Diagnostics, EngineState};
