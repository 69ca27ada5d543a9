//! Momentum breakout: a close beyond the previous `lookback` bars' extreme,
//! confirmed by the sign of a momentum indicator.
//!
//! Score magnitude is `min(1, |momentum| / threshold)`.

use crate::domain::Bar;

use super::SubSignalGenerator;

#[derive(Debug, Clone)]
pub struct MomentumBreakout {
    pub lookback: usize,
    pub key: String,
    pub threshold: f64,
}

impl MomentumBreakout {
    pub fn new(lookback: usize, key: impl Into<String>, threshold: f64) -> Self {
        Self {
            lookback: lookback.max(1),
            key: key.into(),
            threshold,
        }
    }

    pub fn default_params() -> Self {
        Self::new(20, "momentum", 0.05)
    }
}

impl SubSignalGenerator for MomentumBreakout {
    fn name(&self) -> &str {
        "momentum_breakout"
    }

    fn warmup_bars(&self) -> usize {
        self.lookback + 1
    }

    fn evaluate(&self, history: &[Bar]) -> Option<f64> {
        let n = history.len();
        if n < self.warmup_bars() {
            return None;
        }
        let bar = &history[n - 1];
        let momentum = bar.indicator(&self.key)?;
        let prior = &history[n - 1 - self.lookback..n - 1];

        let highest = prior.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let lowest = prior.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let magnitude = (momentum.abs() / self.threshold).min(1.0);

        let score = if bar.close > highest && momentum > 0.0 {
            magnitude
        } else if bar.close < lowest && momentum < 0.0 {
            -magnitude
        } else {
            0.0
        };
        Some(score)
    }
}
