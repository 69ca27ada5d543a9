//! RegimeLab Core: regime-aware signal engine, risk sizing, position
//! lifecycle and portfolio risk allocation.
//!
//! This crate contains the simulation core:
//! - Domain types (bars, positions, trades, equity points)
//! - Window-based regime classifier with majority-vote smoothing
//! - Weighted multi-timeframe signal aggregation
//! - Leverage-aware risk sizer with a liquidation guard
//! - Position lifecycle with ratcheting trailing stops and exit ladders
//! - Tiered portfolio risk allocator
//! - Bar-by-bar engine loop and run fingerprinting

pub mod allocator;
pub mod components;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod position_management;
pub mod regime;
pub mod sizers;

pub use config::EngineConfig;
pub use engine::{run_backtest, Engine, RunResult};
pub use error::{ConfigError, EngineError};
