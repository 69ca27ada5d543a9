//! Bar: one OHLCV candle plus its precomputed indicator snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EngineError;

/// Read-only indicator values attached to a bar.
///
/// Computed upstream; the engine never writes back into a snapshot. A NaN value
/// marks an indicator that is not yet available (warm-up).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    values: BTreeMap<String, f64>,
}

impl IndicatorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used by data loaders and tests.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Value for `name`, or `None` if missing or still warming up.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().filter(|v| v.is_finite())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw entries in key order, warm-up markers included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for IndicatorSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// OHLCV bar for a single symbol and interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub indicators: IndicatorSnapshot,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: IndicatorSnapshot::new(),
        }
    }

    pub fn with_indicators(mut self, indicators: IndicatorSnapshot) -> Self {
        self.indicators = indicators;
        self
    }

    /// Shorthand for `self.indicators.get(name)`.
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name)
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// True range against the previous close (plain high-low when there is none).
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let high_low = self.high - self.low;
        match prev_close {
            Some(pc) => high_low
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => high_low,
        }
    }

    /// OHLCV sanity check: finite positive values, high/low envelope the body.
    pub fn validate(&self) -> Result<(), EngineError> {
        let fail = |reason: &str| {
            Err(EngineError::MalformedBar {
                timestamp: self.timestamp,
                reason: reason.to_string(),
            })
        };
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) || !self.volume.is_finite() {
            return fail("non-finite OHLCV value");
        }
        if prices.iter().any(|&p| p <= 0.0) {
            return fail("non-positive price");
        }
        if self.volume <= 0.0 {
            return fail("non-positive volume");
        }
        if self.high < self.open.max(self.close) {
            return fail("high below open/close");
        }
        if self.low > self.open.min(self.close) {
            return fail("low above open/close");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bar() -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            100.0,
            105.0,
            98.0,
            103.0,
            50_000.0,
        )
    }

    #[test]
    fn sane_bar_validates() {
        assert!(sample_bar().validate().is_ok());
    }

    #[test]
    fn nan_price_is_malformed() {
        let mut bar = sample_bar();
        bar.open = f64::NAN;
        assert!(matches!(
            bar.validate(),
            Err(EngineError::MalformedBar { .. })
        ));
    }

    #[test]
    fn zero_or_negative_volume_is_malformed() {
        for volume in [0.0, -1.0] {
            let mut bar = sample_bar();
            bar.volume = volume;
            let err = bar.validate().unwrap_err();
            assert!(err.to_string().contains("non-positive volume"));
        }
    }

    #[test]
    fn high_below_close_is_malformed() {
        let mut bar = sample_bar();
        bar.high = 102.0;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn warmup_indicator_reads_as_missing() {
        let bar = sample_bar().with_indicators(
            IndicatorSnapshot::new()
                .with("rsi", f64::NAN)
                .with("atr", 2.5),
        );
        assert_eq!(bar.indicator("rsi"), None);
        assert_eq!(bar.indicator("atr"), Some(2.5));
        assert_eq!(bar.indicator("macd"), None);
    }

    #[test]
    fn true_range_uses_previous_close_gap() {
        let bar = sample_bar();
        assert_eq!(bar.true_range(None), 7.0);
        // Gap down from 110: |98 - 110| = 12
        assert_eq!(bar.true_range(Some(110.0)), 12.0);
    }
}
