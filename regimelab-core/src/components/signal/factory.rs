//! Factory: converts typed generator configs into runtime trait objects.

use crate::config::{GeneratorConfig, GeneratorKind};

use super::aggregator::{SignalAggregator, WeightedGenerator};
use super::{
    BandBreakout, MomentumBreakout, MovingAverageCross, OscillatorThreshold, SubSignalGenerator,
};

/// Create a generator from its config.
pub fn create_generator(config: &GeneratorConfig) -> Box<dyn SubSignalGenerator> {
    match &config.kind {
        GeneratorKind::OscillatorThreshold {
            key,
            oversold,
            overbought,
        } => Box::new(OscillatorThreshold::new(key.clone(), *oversold, *overbought)),
        GeneratorKind::MovingAverageCross {
            fast_key,
            slow_key,
            decay_bars,
        } => Box::new(MovingAverageCross::new(fast_key.clone(), slow_key.clone(), *decay_bars)),
        GeneratorKind::BandBreakout {
            upper_key,
            middle_key,
            lower_key,
        } => Box::new(BandBreakout::new(
            upper_key.clone(),
            middle_key.clone(),
            lower_key.clone(),
        )),
        GeneratorKind::MomentumBreakout {
            lookback,
            key,
            threshold,
        } => Box::new(MomentumBreakout::new(*lookback, key.clone(), *threshold)),
    }
}

/// Build an aggregator over every configured generator. Zero-weight
/// generators are dropped.
pub fn build_aggregator(configs: &[GeneratorConfig]) -> SignalAggregator {
    SignalAggregator::new(
        configs
            .iter()
            .filter(|c| c.weight > 0.0)
            .map(|c| WeightedGenerator {
                generator: create_generator(c),
                weight: c.weight,
            })
            .collect(),
    )
}
