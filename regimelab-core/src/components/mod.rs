//! Signal components: sub-signal generators, their factory, and the
//! multi-timeframe aggregator that turns them into one composite `Signal`.

pub mod signal;

pub use signal::aggregator::{RegimeAggregators, SignalAggregator, TimeframeInput, TimeframeScore};
pub use signal::factory::{build_aggregator, create_generator};
pub use signal::{Direction, Signal, SubSignal, SubSignalGenerator};
