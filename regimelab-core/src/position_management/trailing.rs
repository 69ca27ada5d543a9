//! Trailing stop: arms once price moves `activation_pct` in favour, then
//! trails the favourable extreme by `callback_pct` through a ratchet.

use serde::{Deserialize, Serialize};

use super::ratchet::RatchetState;
use crate::domain::PositionSide;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub side: PositionSide,
    pub activation_price: f64,
    pub callback_pct: f64,
    pub armed: bool,
    /// Best price seen since arming.
    pub extreme: Option<f64>,
    ratchet: RatchetState,
}

impl TrailingStop {
    pub fn new(
        side: PositionSide,
        entry_price: f64,
        activation_pct: f64,
        callback_pct: f64,
    ) -> Self {
        let activation_price = match side {
            PositionSide::Long => entry_price * (1.0 + activation_pct),
            PositionSide::Short => entry_price * (1.0 - activation_pct),
        };
        Self {
            side,
            activation_price,
            callback_pct,
            armed: false,
            extreme: None,
            ratchet: RatchetState::new(side),
        }
    }

    /// Current trail level, `None` until armed.
    pub fn trail_price(&self) -> Option<f64> {
        if self.armed {
            self.ratchet.level()
        } else {
            None
        }
    }

    /// Feed one bar's range. Arms on the activation touch and updates the
    /// trail from the favourable extreme. Returns true if this call armed it.
    pub fn update(&mut self, high: f64, low: f64) -> bool {
        let favourable = match self.side {
            PositionSide::Long => high,
            PositionSide::Short => low,
        };
        let mut armed_now = false;
        if !self.armed {
            let reached = match self.side {
                PositionSide::Long => favourable >= self.activation_price,
                PositionSide::Short => favourable <= self.activation_price,
            };
            if !reached {
                return false;
            }
            self.armed = true;
            armed_now = true;
        }

        let extreme = match (self.extreme, self.side) {
            (None, _) => favourable,
            (Some(e), PositionSide::Long) => e.max(favourable),
            (Some(e), PositionSide::Short) => e.min(favourable),
        };
        self.extreme = Some(extreme);

        let proposed = match self.side {
            PositionSide::Long => extreme * (1.0 - self.callback_pct),
            PositionSide::Short => extreme * (1.0 + self.callback_pct),
        };
        self.ratchet.apply(proposed);
        armed_now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arms_only_after_activation() {
        let mut t = TrailingStop::new(PositionSide::Long, 100.0, 0.05, 0.02);
        assert!((t.activation_price - 105.0).abs() < 1e-9);
        assert!(!t.update(104.0, 99.0));
        assert_eq!(t.trail_price(), None);
        assert!(t.update(106.0, 103.0));
        assert!((t.trail_price().unwrap() - 103.88).abs() < 1e-9);
    }

    #[test]
    fn long_trail_never_loosens() {
        let mut t = TrailingStop::new(PositionSide::Long, 100.0, 0.0, 0.1);
        t.update(120.0, 110.0);
        let after_peak = t.trail_price().unwrap();
        t.update(112.0, 100.0);
        assert_eq!(t.trail_price().unwrap(), after_peak);
        t.update(130.0, 125.0);
        assert!(t.trail_price().unwrap() > after_peak);
    }

    #[test]
    fn short_trail_follows_lows() {
        let mut t = TrailingStop::new(PositionSide::Short, 100.0, 0.05, 0.02);
        assert!((t.activation_price - 95.0).abs() < 1e-9);
        t.update(101.0, 94.0);
        assert!((t.trail_price().unwrap() - 95.88).abs() < 1e-9);
        t.update(99.0, 96.0);
        assert!((t.trail_price().unwrap() - 95.88).abs() < 1e-9);
    }
}
