//! Market regime classification.
//!
//! A regime is a pure function of a trailing window of bars. The only
//! cross-call state is the optional majority-vote smoother.

pub mod classifier;
pub mod smoothing;

pub use classifier::{RegimeClassifier, RegimeThresholds, WindowMetrics};
pub use smoothing::RegimeSmoother;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of current market behaviour.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    #[default]
    Ranging,
    Volatile,
    Quiet,
}

impl Regime {
    pub const ALL: [Regime; 5] = [
        Regime::TrendingUp,
        Regime::TrendingDown,
        Regime::Ranging,
        Regime::Volatile,
        Regime::Quiet,
    ];

    pub fn is_trending(self) -> bool {
        matches!(self, Self::TrendingUp | Self::TrendingDown)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TrendingUp => "trending_up",
            Self::TrendingDown => "trending_down",
            Self::Ranging => "ranging",
            Self::Volatile => "volatile",
            Self::Quiet => "quiet",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
