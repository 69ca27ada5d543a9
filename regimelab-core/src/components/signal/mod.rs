//! Sub-signal generation and the composite signal type.
//!
//! Generators are portfolio-agnostic: they see a bar history (oldest first,
//! current bar last) and nothing else. Each maps the indicator snapshot to a
//! score in [-1, +1], or `None` when its inputs are still warming up. A
//! `Signal` is built fresh per bar and never mutated afterwards.

pub mod aggregator;
pub mod band_breakout;
pub mod factory;
pub mod ma_cross;
pub mod momentum_breakout;
pub mod oscillator;

pub use band_breakout::BandBreakout;
pub use ma_cross::MovingAverageCross;
pub use momentum_breakout::MomentumBreakout;
pub use oscillator::OscillatorThreshold;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, PositionSide};
use crate::regime::Regime;

/// Composite direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    /// Sign of `score` if its magnitude exceeds `min_strength`, else `Flat`.
    /// A score of exactly zero is always `Flat`.
    pub fn from_score(score: f64, min_strength: f64) -> Self {
        if score == 0.0 || score.abs() <= min_strength {
            Self::Flat
        } else if score > 0.0 {
            Self::Long
        } else {
            Self::Short
        }
    }

    pub fn side(self) -> Option<PositionSide> {
        match self {
            Self::Long => Some(PositionSide::Long),
            Self::Short => Some(PositionSide::Short),
            Self::Flat => None,
        }
    }
}

/// One generator's contribution to a composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubSignal {
    pub generator: String,
    pub timeframe: String,
    pub score: f64,
    pub weight: f64,
}

/// The aggregated, immutable per-bar signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// |composite|, in [0, 1].
    pub strength: f64,
    pub composite: f64,
    /// Weighted fraction of timeframes agreeing with the composite's sign.
    pub alignment: f64,
    /// True when a directional composite was suppressed by the alignment filter.
    pub filtered: bool,
    pub regime: Regime,
    pub components: Vec<SubSignal>,
}

impl Signal {
    pub fn flat(timestamp: DateTime<Utc>, regime: Regime) -> Self {
        Self {
            timestamp,
            direction: Direction::Flat,
            strength: 0.0,
            composite: 0.0,
            alignment: 0.0,
            filtered: false,
            regime,
            components: Vec::new(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::Flat
    }
}

/// A single indicator-based scoring rule.
pub trait SubSignalGenerator: Send + Sync {
    /// Human-readable name (e.g., "oscillator_threshold").
    fn name(&self) -> &str;

    /// Bars of history needed, including the current bar.
    fn warmup_bars(&self) -> usize;

    /// Score the last bar of `history` in [-1, +1]; `None` when the inputs
    /// are unavailable.
    fn evaluate(&self, history: &[Bar]) -> Option<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_score_is_flat() {
        assert_eq!(Direction::from_score(0.0, 0.0), Direction::Flat);
        assert_eq!(Direction::from_score(-0.0, 0.0), Direction::Flat);
    }

    #[test]
    fn score_must_exceed_minimum() {
        assert_eq!(Direction::from_score(0.3, 0.3), Direction::Flat);
        assert_eq!(Direction::from_score(0.31, 0.3), Direction::Long);
        assert_eq!(Direction::from_score(-0.9, 0.3), Direction::Short);
        assert_eq!(Direction::Short.side(), Some(PositionSide::Short));
        assert_eq!(Direction::Flat.side(), None);
    }
}
