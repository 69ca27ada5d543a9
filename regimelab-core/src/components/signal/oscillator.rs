//! Oscillator threshold: mean-reversion score from a bounded 0–100
//! oscillator such as RSI.
//!
//! Below `oversold` scores positive in proportion to the distance below the
//! threshold; above `overbought` scores negative the same way.

use crate::domain::Bar;

use super::SubSignalGenerator;

#[derive(Debug, Clone)]
pub struct OscillatorThreshold {
    pub key: String,
    pub oversold: f64,
    pub overbought: f64,
}

impl OscillatorThreshold {
    pub fn new(key: impl Into<String>, oversold: f64, overbought: f64) -> Self {
        Self {
            key: key.into(),
            oversold,
            overbought,
        }
    }

    pub fn default_params() -> Self {
        Self::new("rsi", 30.0, 70.0)
    }

    /// Score for a single oscillator reading.
    pub fn score(&self, value: f64) -> f64 {
        let raw = if value < self.oversold {
            (self.oversold - value) / self.oversold
        } else if value > self.overbought {
            -(value - self.overbought) / (100.0 - self.overbought)
        } else {
            0.0
        };
        raw.clamp(-1.0, 1.0)
    }
}

impl SubSignalGenerator for OscillatorThreshold {
    fn name(&self) -> &str {
        "oscillator_threshold"
    }

    fn warmup_bars(&self) -> usize {
        1
    }

    fn evaluate(&self, history: &[Bar]) -> Option<f64> {
        let bar = history.last()?;
        bar.indicator(&self.key).map(|v| self.score(v))
    }
}
