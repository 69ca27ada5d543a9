//! Position: an open (or just-closed) exposure owned by the lifecycle engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::PositionId;
use crate::error::EngineError;
use crate::position_management::{ExitLadder, TrailingStop};
use crate::regime::Regime;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1.0 for longs, -1.0 for shorts.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Price move expressed in the position's favour: positive = profit.
    pub fn favorable_move(self, from: f64, to: f64) -> f64 {
        (to - from) * self.sign()
    }
}

/// Lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Opening,
    Open,
    PartiallyClosed,
    Closed,
}

impl PositionState {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Open | Self::PartiallyClosed)
    }
}

/// Everything needed to open a position. Validated by [`Position::open`].
#[derive(Debug, Clone)]
pub struct PositionRequest {
    pub side: PositionSide,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_bar: usize,
    pub quantity: f64,
    pub leverage: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing: Option<TrailingStop>,
    pub ladder: ExitLadder,
    pub risk_reserved: f64,
    pub regime_at_entry: Regime,
    pub tier: String,
}

/// Position tracking.
///
/// Invariants while live: `quantity > 0`, the stop-loss sits on the loss side
/// of entry and the take-profit on the profit side, and the consumed ladder
/// portions never exceed 1.0 of `original_quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub side: PositionSide,
    pub state: PositionState,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_bar: usize,
    pub original_quantity: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing: Option<TrailingStop>,
    pub ladder: ExitLadder,
    pub risk_reserved: f64,
    pub regime_at_entry: Regime,
    pub tier: String,
    pub bars_held: usize,
    pub highest_price_since_entry: f64,
    pub lowest_price_since_entry: f64,
}

impl Position {
    /// Validate a request and create the position in `Opening` state.
    ///
    /// Malformed requests never produce a position.
    pub fn open(id: PositionId, request: PositionRequest) -> Result<Self, EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidPositionConfig(msg));

        if !(request.entry_price.is_finite() && request.entry_price > 0.0) {
            return invalid(format!("entry price {} must be positive", request.entry_price));
        }
        if !(request.quantity.is_finite() && request.quantity > 0.0) {
            return invalid(format!("quantity {} must be positive", request.quantity));
        }
        if !(request.leverage.is_finite() && request.leverage >= 1.0) {
            return invalid(format!("leverage {} must be >= 1", request.leverage));
        }
        let stop_ok = match request.side {
            PositionSide::Long => {
                request.stop_loss < request.entry_price && request.stop_loss > 0.0
            }
            PositionSide::Short => request.stop_loss > request.entry_price,
        };
        if !stop_ok {
            return invalid(format!(
                "stop-loss {} on wrong side of entry {} for {:?}",
                request.stop_loss, request.entry_price, request.side
            ));
        }
        let target_ok = match request.side {
            PositionSide::Long => request.take_profit > request.entry_price,
            PositionSide::Short => {
                request.take_profit < request.entry_price && request.take_profit > 0.0
            }
        };
        if !target_ok {
            return invalid(format!(
                "take-profit {} on wrong side of entry {} for {:?}",
                request.take_profit, request.entry_price, request.side
            ));
        }
        if request.ladder.total_portion() > 1.0 + 1e-9 {
            return invalid(format!(
                "ladder portions sum to {} (> 1.0)",
                request.ladder.total_portion()
            ));
        }
        if request.risk_reserved < 0.0 {
            return invalid(format!("risk reservation {} is negative", request.risk_reserved));
        }

        Ok(Self {
            id,
            side: request.side,
            state: PositionState::Opening,
            entry_price: request.entry_price,
            entry_time: request.entry_time,
            entry_bar: request.entry_bar,
            original_quantity: request.quantity,
            quantity: request.quantity,
            leverage: request.leverage,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            trailing: request.trailing,
            ladder: request.ladder,
            risk_reserved: request.risk_reserved,
            regime_at_entry: request.regime_at_entry,
            tier: request.tier,
            bars_held: 0,
            highest_price_since_entry: request.entry_price,
            lowest_price_since_entry: request.entry_price,
        })
    }

    /// OPENING → OPEN, once the risk budget reservation has been committed.
    pub fn activate(&mut self) {
        if self.state == PositionState::Opening {
            self.state = PositionState::Open;
        }
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Realised (or unrealised) P&L for `quantity` units exited at `price`.
    pub fn pnl_at(&self, price: f64, quantity: f64) -> f64 {
        self.side.favorable_move(self.entry_price, price) * quantity * self.leverage
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.pnl_at(mark, self.quantity)
    }

    /// Track excursions and holding time for one bar.
    pub fn observe_bar(&mut self, high: f64, low: f64) {
        self.bars_held += 1;
        self.highest_price_since_entry = self.highest_price_since_entry.max(high);
        self.lowest_price_since_entry = self.lowest_price_since_entry.min(low);
    }

    /// Maximum favourable excursion, in price units.
    pub fn mfe(&self) -> f64 {
        match self.side {
            PositionSide::Long => self.highest_price_since_entry - self.entry_price,
            PositionSide::Short => self.entry_price - self.lowest_price_since_entry,
        }
    }

    /// Maximum adverse excursion, in price units (non-positive).
    pub fn mae(&self) -> f64 {
        match self.side {
            PositionSide::Long => self.lowest_price_since_entry - self.entry_price,
            PositionSide::Short => self.entry_price - self.highest_price_since_entry,
        }
    }

    /// Reduce the open quantity by `released`, returning the share of the
    /// reservation freed by that reduction.
    pub fn reduce(&mut self, released: f64) -> f64 {
        let released = released.min(self.quantity);
        let fraction = if self.quantity > 0.0 {
            released / self.quantity
        } else {
            1.0
        };
        let freed = self.risk_reserved * fraction;
        self.quantity -= released;
        self.risk_reserved -= freed;
        if self.quantity <= self.original_quantity * 1e-12 {
            self.quantity = 0.0;
        } else {
            self.state = PositionState::PartiallyClosed;
        }
        freed
    }

    /// Terminal transition. Returns the reservation still held.
    pub fn close(&mut self) -> f64 {
        let freed = self.risk_reserved;
        self.risk_reserved = 0.0;
        self.state = PositionState::Closed;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position_management::LadderRung;
    use chrono::TimeZone;

    fn request(side: PositionSide, stop: f64, target: f64) -> PositionRequest {
        PositionRequest {
            side,
            entry_price: 100.0,
            entry_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            entry_bar: 0,
            quantity: 40.0,
            leverage: 1.0,
            stop_loss: stop,
            take_profit: target,
            trailing: None,
            ladder: ExitLadder::default(),
            risk_reserved: 200.0,
            regime_at_entry: Regime::Ranging,
            tier: "moderate".into(),
        }
    }

    #[test]
    fn long_opens_in_opening_state() {
        let mut pos =
            Position::open(PositionId(1), request(PositionSide::Long, 95.0, 110.0)).unwrap();
        assert_eq!(pos.state, PositionState::Opening);
        pos.activate();
        assert_eq!(pos.state, PositionState::Open);
    }

    #[test]
    fn long_stop_above_entry_rejected() {
        let err =
            Position::open(PositionId(1), request(PositionSide::Long, 101.0, 110.0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPositionConfig(_)));
    }

    #[test]
    fn short_target_above_entry_rejected() {
        assert!(Position::open(PositionId(1), request(PositionSide::Short, 105.0, 101.0)).is_err());
        assert!(Position::open(PositionId(1), request(PositionSide::Short, 105.0, 90.0)).is_ok());
    }

    #[test]
    fn zero_quantity_rejected() {
        let mut s = request(PositionSide::Long, 95.0, 110.0);
        s.quantity = 0.0;
        assert!(Position::open(PositionId(1), s).is_err());
    }

    #[test]
    fn oversized_ladder_rejected() {
        let mut s = request(PositionSide::Long, 95.0, 110.0);
        s.ladder = ExitLadder::new(vec![LadderRung::new(0.02, 0.6), LadderRung::new(0.04, 0.6)]);
        assert!(Position::open(PositionId(1), s).is_err());
    }

    #[test]
    fn pnl_sign_follows_side() {
        let long = Position::open(PositionId(1), request(PositionSide::Long, 95.0, 110.0)).unwrap();
        assert_eq!(long.pnl_at(110.0, 40.0), 400.0);
        let short =
            Position::open(PositionId(2), request(PositionSide::Short, 105.0, 90.0)).unwrap();
        assert_eq!(short.pnl_at(110.0, 40.0), -400.0);
    }

    #[test]
    fn reduce_releases_proportional_risk() {
        let mut pos =
            Position::open(PositionId(1), request(PositionSide::Long, 95.0, 110.0)).unwrap();
        pos.activate();
        let freed = pos.reduce(10.0);
        assert!((freed - 50.0).abs() < 1e-9);
        assert_eq!(pos.quantity, 30.0);
        assert_eq!(pos.state, PositionState::PartiallyClosed);
        assert!((pos.close() - 150.0).abs() < 1e-9);
        assert_eq!(pos.state, PositionState::Closed);
    }

    #[test]
    fn excursions_track_extremes() {
        let mut pos =
            Position::open(PositionId(1), request(PositionSide::Long, 95.0, 110.0)).unwrap();
        pos.observe_bar(104.0, 97.0);
        pos.observe_bar(106.0, 99.0);
        assert_eq!(pos.bars_held, 2);
        assert_eq!(pos.mfe(), 6.0);
        assert_eq!(pos.mae(), -3.0);
    }
}
