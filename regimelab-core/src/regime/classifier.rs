//! Window-based regime classifier.
//!
//! Three window metrics drive the decision:
//! - trend magnitude: % change from the first to the last close
//! - volatility: mean true range normalised by mean close
//! - directional strength: ADX-like mean DX from +DM / −DM over the window
//!
//! Rules are evaluated in a fixed priority order so ties are deterministic:
//! trending → volatile → quiet → ranging.

use serde::{Deserialize, Serialize};

use super::Regime;
use crate::domain::Bar;
use crate::error::{ConfigError, EngineError};

/// Classification thresholds. All percentages are fractions (0.02 = 2%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeThresholds {
    /// Window length W. Fewer bars ⇒ `InsufficientData`.
    pub window: usize,
    /// Directional strength (0–100) above which a move counts as a trend.
    pub adx_trending: f64,
    /// Minimum |trend magnitude| for a trend.
    pub min_trend_pct: f64,
    /// Volatility above which the market is volatile.
    pub volatile_pct: f64,
    /// |trend magnitude| below which the market may be quiet.
    pub quiet_trend_pct: f64,
    /// Volatility below which the market may be quiet.
    pub quiet_volatility_pct: f64,
    /// Majority-vote length; 1 disables smoothing.
    pub smoothing: usize,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            window: 30,
            adx_trending: 25.0,
            min_trend_pct: 0.02,
            volatile_pct: 0.04,
            quiet_trend_pct: 0.01,
            quiet_volatility_pct: 0.01,
            smoothing: 3,
        }
    }
}

impl RegimeThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window < 2 {
            return Err(ConfigError::invalid("regime.window", "must be >= 2"));
        }
        if self.smoothing == 0 {
            return Err(ConfigError::invalid("regime.smoothing", "must be >= 1"));
        }
        if !(0.0..=100.0).contains(&self.adx_trending) {
            return Err(ConfigError::invalid("regime.adx_trending", "must be in [0, 100]"));
        }
        let pcts = [
            ("regime.min_trend_pct", self.min_trend_pct),
            ("regime.volatile_pct", self.volatile_pct),
            ("regime.quiet_trend_pct", self.quiet_trend_pct),
            ("regime.quiet_volatility_pct", self.quiet_volatility_pct),
        ];
        for (field, value) in pcts {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::invalid(field, "must be a non-negative fraction"));
            }
        }
        Ok(())
    }
}

/// Metrics computed over one classification window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub trend_pct: f64,
    pub volatility_pct: f64,
    pub directional_strength: f64,
    /// Mean true range in price units (reused as an ATR fallback).
    pub mean_true_range: f64,
}

impl WindowMetrics {
    /// Compute metrics for the whole slice. Caller guarantees `bars.len() >= 2`.
    pub fn compute(bars: &[Bar]) -> Self {
        let first = bars[0].close;
        let last = bars[bars.len() - 1].close;
        let trend_pct = if first > 0.0 { (last - first) / first } else { 0.0 };

        let mut tr_sum = 0.0;
        let mut close_sum = 0.0;
        let mut dx_sum = 0.0;
        let mut dx_count = 0usize;

        for (i, bar) in bars.iter().enumerate() {
            close_sum += bar.close;
            let prev = if i > 0 { Some(&bars[i - 1]) } else { None };
            let tr = bar.true_range(prev.map(|p| p.close));
            tr_sum += tr;

            if let Some(prev) = prev {
                let up = bar.high - prev.high;
                let down = prev.low - bar.low;
                let plus_dm = if up > down && up > 0.0 { up } else { 0.0 };
                let minus_dm = if down > up && down > 0.0 { down } else { 0.0 };
                if tr > 0.0 {
                    let plus_di = plus_dm / tr;
                    let minus_di = minus_dm / tr;
                    let di_sum = plus_di + minus_di;
                    if di_sum > 0.0 {
                        dx_sum += 100.0 * (plus_di - minus_di).abs() / di_sum;
                    }
                }
                dx_count += 1;
            }
        }

        let n = bars.len() as f64;
        let mean_true_range = tr_sum / n;
        let mean_close = close_sum / n;
        let volatility_pct = if mean_close > 0.0 {
            mean_true_range / mean_close
        } else {
            0.0
        };
        let directional_strength = if dx_count > 0 {
            dx_sum / dx_count as f64
        } else {
            0.0
        };

        Self {
            trend_pct,
            volatility_pct,
            directional_strength,
            mean_true_range,
        }
    }
}

/// Pure window classifier.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
}

impl RegimeClassifier {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn default_params() -> Self {
        Self::new(RegimeThresholds::default())
    }

    pub fn thresholds(&self) -> &RegimeThresholds {
        &self.thresholds
    }

    pub fn window(&self) -> usize {
        self.thresholds.window
    }

    /// Metrics over the trailing W bars of `bars`.
    pub fn metrics(&self, bars: &[Bar]) -> Result<WindowMetrics, EngineError> {
        let w = self.thresholds.window;
        if bars.len() < w {
            return Err(EngineError::InsufficientData {
                required: w,
                available: bars.len(),
            });
        }
        Ok(WindowMetrics::compute(&bars[bars.len() - w..]))
    }

    /// Classify the trailing W bars of `bars`.
    pub fn classify(&self, bars: &[Bar]) -> Result<Regime, EngineError> {
        self.metrics(bars).map(|m| self.classify_metrics(&m))
    }

    /// Classification with the documented fallback: `Ranging` when the window is short.
    pub fn classify_or_default(&self, bars: &[Bar]) -> Regime {
        self.classify(bars).unwrap_or(Regime::Ranging)
    }

    /// Apply the priority-ordered rules to precomputed metrics.
    pub fn classify_metrics(&self, m: &WindowMetrics) -> Regime {
        let t = &self.thresholds;
        if m.directional_strength > t.adx_trending && m.trend_pct.abs() > t.min_trend_pct {
            return if m.trend_pct > 0.0 {
                Regime::TrendingUp
            } else {
                Regime::TrendingDown
            };
        }
        if m.volatility_pct > t.volatile_pct {
            return Regime::Volatile;
        }
        if m.trend_pct.abs() < t.quiet_trend_pct && m.volatility_pct < t.quiet_volatility_pct {
            return Regime::Quiet;
        }
        Regime::Ranging
    }
}
