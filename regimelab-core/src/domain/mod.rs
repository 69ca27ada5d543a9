//! Domain types for RegimeLab

pub mod bar;
pub mod equity;
pub mod ids;
pub mod position;
pub mod trade;

pub use bar::{Bar, IndicatorSnapshot};
pub use equity::{equity_values, EquityPoint};
pub use ids::{IdGen, PositionId, TradeId};
pub use position::{Position, PositionRequest, PositionSide, PositionState};
pub use trade::{ExitReason, TradeRecord};
