//! Signal aggregation.
//!
//! Per timeframe, the composite is the weighted mean of the available
//! sub-signal scores (unavailable generators drop out of the denominator).
//! Across timeframes, the overall composite is the weighted mean of the
//! per-timeframe composites, and the alignment fraction is the weight share
//! of timeframes whose composite has the overall composite's sign. A
//! directional composite with alignment below the regime threshold is
//! emitted as `Flat` and marked `filtered`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::{RegimeConfig, RegimeConfigs};
use crate::domain::Bar;
use crate::regime::Regime;

use super::factory::build_aggregator;
use super::{Direction, Signal, SubSignal, SubSignalGenerator};

pub struct WeightedGenerator {
    pub generator: Box<dyn SubSignalGenerator>,
    pub weight: f64,
}

/// Composite of one timeframe.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeframeScore {
    pub composite: f64,
    pub components: Vec<SubSignal>,
}

/// Bar history for one timeframe, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct TimeframeInput<'a> {
    pub name: &'a str,
    pub weight: f64,
    pub history: &'a [Bar],
}

/// Weighted set of sub-signal generators.
#[derive(Default)]
pub struct SignalAggregator {
    generators: Vec<WeightedGenerator>,
}

impl SignalAggregator {
    pub fn new(generators: Vec<WeightedGenerator>) -> Self {
        Self { generators }
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Composite for one timeframe; `None` when no generator has inputs.
    pub fn score(&self, timeframe: &str, history: &[Bar]) -> Option<TimeframeScore> {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut components = Vec::new();
        for wg in &self.generators {
            let Some(score) = wg.generator.evaluate(history) else {
                continue;
            };
            weighted += score * wg.weight;
            total_weight += wg.weight;
            components.push(SubSignal {
                generator: wg.generator.name().to_string(),
                timeframe: timeframe.to_string(),
                score,
                weight: wg.weight,
            });
        }
        if total_weight <= 0.0 {
            return None;
        }
        Some(TimeframeScore {
            composite: (weighted / total_weight).clamp(-1.0, 1.0),
            components,
        })
    }

    /// Combine all timeframes into the bar's `Signal`.
    pub fn aggregate(
        &self,
        inputs: &[TimeframeInput<'_>],
        regime: Regime,
        config: &RegimeConfig,
        timestamp: DateTime<Utc>,
    ) -> Signal {
        let mut scored = Vec::with_capacity(inputs.len());
        let mut components = Vec::new();
        for input in inputs {
            if let Some(s) = self.score(input.name, input.history) {
                scored.push((input.weight, s.composite));
                components.extend(s.components);
            }
        }

        let total_weight: f64 = scored.iter().map(|(w, _)| w).sum();
        if total_weight <= 0.0 {
            return Signal::flat(timestamp, regime);
        }
        let composite = scored.iter().map(|(w, c)| w * c).sum::<f64>() / total_weight;
        let alignment = if composite == 0.0 {
            0.0
        } else {
            scored
                .iter()
                .filter(|(_, c)| *c != 0.0 && c.signum() == composite.signum())
                .map(|(w, _)| w)
                .sum::<f64>()
                / total_weight
        };

        let raw = Direction::from_score(composite, config.min_signal_strength);
        let filtered = raw != Direction::Flat && alignment < config.timeframe_alignment_threshold;
        let direction = if filtered { Direction::Flat } else { raw };

        Signal {
            timestamp,
            direction,
            strength: composite.abs().min(1.0),
            composite,
            alignment,
            filtered,
            regime,
            components,
        }
    }
}

/// One aggregator per regime, built from that regime's generator list.
pub struct RegimeAggregators {
    by_regime: BTreeMap<Regime, SignalAggregator>,
}

impl RegimeAggregators {
    pub fn from_configs(configs: &RegimeConfigs) -> Self {
        Self {
            by_regime: configs
                .iter()
                .map(|(regime, c)| (regime, build_aggregator(&c.generators)))
                .collect(),
        }
    }

    pub fn get(&self, regime: Regime) -> Option<&SignalAggregator> {
        self.by_regime.get(&regime)
    }
}
