//! Moving-average cross: +1 / −1 on the crossing bar, decaying linearly to
//! zero over `decay_bars` bars.
//!
//! Works for any pair of series: fast/slow MAs, or MACD line vs. signal line.

use crate::domain::Bar;

use super::SubSignalGenerator;

#[derive(Debug, Clone)]
pub struct MovingAverageCross {
    pub fast_key: String,
    pub slow_key: String,
    pub decay_bars: usize,
}

impl MovingAverageCross {
    pub fn new(
        fast_key: impl Into<String>,
        slow_key: impl Into<String>,
        decay_bars: usize,
    ) -> Self {
        Self {
            fast_key: fast_key.into(),
            slow_key: slow_key.into(),
            decay_bars: decay_bars.max(1),
        }
    }

    pub fn default_params() -> Self {
        Self::new("ema_fast", "ema_slow", 3)
    }

    /// +1 for an upward cross between `prev` and `cur`, −1 downward, else 0.
    fn cross_at(&self, prev: &Bar, cur: &Bar) -> f64 {
        let values = (
            prev.indicator(&self.fast_key),
            prev.indicator(&self.slow_key),
            cur.indicator(&self.fast_key),
            cur.indicator(&self.slow_key),
        );
        match values {
            (Some(fp), Some(sp), Some(fc), Some(sc)) => {
                if fc > sc && fp <= sp {
                    1.0
                } else if fc < sc && fp >= sp {
                    -1.0
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

impl SubSignalGenerator for MovingAverageCross {
    fn name(&self) -> &str {
        "moving_average_cross"
    }

    fn warmup_bars(&self) -> usize {
        self.decay_bars + 1
    }

    fn evaluate(&self, history: &[Bar]) -> Option<f64> {
        let n = history.len();
        if n < 2 {
            return None;
        }
        let current = &history[n - 1];
        current.indicator(&self.fast_key)?;
        current.indicator(&self.slow_key)?;

        // Most recent cross within the decay window wins.
        for age in 0..self.decay_bars.min(n - 1) {
            let cur = &history[n - 1 - age];
            let prev = &history[n - 2 - age];
            let cross = self.cross_at(prev, cur);
            if cross != 0.0 {
                let decay = 1.0 - age as f64 / self.decay_bars as f64;
                return Some(cross * decay);
            }
        }
        Some(0.0)
    }
}
