//! Error taxonomy for the engine.
//!
//! Errors fall into three groups:
//! - Recoverable locally: `InsufficientData` (caller defaults to `Ranging`).
//! - Rejections: `InvalidStopDistance`, `InvalidPositionConfig`, `NoRiskCapacity`,
//!   `LiquidationRisk`. No partial state is committed when these are returned.
//! - Fatal: `OutOfOrderBar`, `MalformedBar`. The run aborts and the last
//!   consistent state is preserved for inspection.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised while processing bars.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("invalid stop distance: entry={entry}, stop={stop}")]
    InvalidStopDistance { entry: f64, stop: f64 },

    #[error("invalid position config: {0}")]
    InvalidPositionConfig(String),

    #[error("no risk capacity: in use {in_use:.2}, ceiling {ceiling:.2}")]
    NoRiskCapacity { in_use: f64, ceiling: f64 },

    #[error("stop {stop} too close to liquidation price {liquidation} at {leverage}x")]
    LiquidationRisk {
        stop: f64,
        liquidation: f64,
        leverage: f64,
    },

    #[error("out-of-order bar: {current} is not after {previous}")]
    OutOfOrderBar {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("malformed bar at {timestamp}: {reason}")]
    MalformedBar {
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

impl EngineError {
    /// Fatal errors abort the run; everything else is handled inside the bar.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfOrderBar { .. } | Self::MalformedBar { .. })
    }
}

/// Errors raised while building or validating configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("no risk tiers configured")]
    NoTiers,

    #[error("duplicate risk tier `{0}`")]
    DuplicateTier(String),

    #[error("canonical encoding failed: {0}")]
    Encode(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
