//! Band breakout: scores closes outside an upper/lower band pair
//! (Bollinger, Keltner, ...). Inside the bands the score is zero.

use crate::domain::Bar;

use super::SubSignalGenerator;

#[derive(Debug, Clone)]
pub struct BandBreakout {
    pub upper_key: String,
    pub middle_key: String,
    pub lower_key: String,
}

impl BandBreakout {
    pub fn new(
        upper_key: impl Into<String>,
        middle_key: impl Into<String>,
        lower_key: impl Into<String>,
    ) -> Self {
        Self {
            upper_key: upper_key.into(),
            middle_key: middle_key.into(),
            lower_key: lower_key.into(),
        }
    }

    pub fn default_params() -> Self {
        Self::new("bb_upper", "bb_middle", "bb_lower")
    }
}

impl SubSignalGenerator for BandBreakout {
    fn name(&self) -> &str {
        "band_breakout"
    }

    fn warmup_bars(&self) -> usize {
        1
    }

    fn evaluate(&self, history: &[Bar]) -> Option<f64> {
        let bar = history.last()?;
        let upper = bar.indicator(&self.upper_key)?;
        let middle = bar.indicator(&self.middle_key)?;
        let lower = bar.indicator(&self.lower_key)?;
        // Collapsed bands carry no information.
        if !(upper > middle && middle > lower) {
            return None;
        }

        let close = bar.close;
        let score = if close > upper {
            (0.5 + 0.5 * (close - upper) / (upper - middle)).min(1.0)
        } else if close < lower {
            -(0.5 + 0.5 * (lower - close) / (middle - lower)).min(1.0)
        } else {
            0.0
        };
        Some(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IndicatorSnapshot;
    use chrono::{TimeZone, Utc};

    fn bar(close: f64) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            close,
            close + 1.0,
            close - 1.0,
            close,
            1.0,
        )
        .with_indicators(
            IndicatorSnapshot::new()
                .with("bb_upper", 110.0)
                .with("bb_middle", 100.0)
                .with("bb_lower", 90.0),
        )
    }

    #[test]
    fn inside_bands_is_zero() {
        let g = BandBreakout::default_params();
        assert_eq!(g.evaluate(&[bar(105.0)]), Some(0.0));
        assert_eq!(g.evaluate(&[bar(110.0)]), Some(0.0));
    }

    #[test]
    fn breakout_scores_scale_and_clamp() {
        let g = BandBreakout::default_params();
        assert!((g.evaluate(&[bar(115.0)]).unwrap() - 0.75).abs() < 1e-12);
        assert_eq!(g.evaluate(&[bar(150.0)]), Some(1.0));
        assert!((g.evaluate(&[bar(85.0)]).unwrap() + 0.75).abs() < 1e-12);
        assert_eq!(g.evaluate(&[bar(40.0)]), Some(-1.0));
    }

    #[test]
    fn collapsed_bands_are_unavailable() {
        let g = BandBreakout::default_params();
        let flat = bar(100.0).with_indicators(
            IndicatorSnapshot::new()
                .with("bb_upper", 100.0)
                .with("bb_middle", 100.0)
                .with("bb_lower", 100.0),
        );
        assert_eq!(g.evaluate(&[flat]), None);
    }
}
