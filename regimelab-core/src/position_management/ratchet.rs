//! Ratchet invariant enforcement.
//!
//! **Core rule:** a trailing level may tighten, never loosen. A long trail
//! only rises, a short trail only falls, regardless of how far the
//! favourable extreme or the callback distance would move it.

use serde::{Deserialize, Serialize};

use crate::domain::PositionSide;

/// One-directional level holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatchetState {
    side: PositionSide,
    level: Option<f64>,
}

impl RatchetState {
    pub fn new(side: PositionSide) -> Self {
        Self { side, level: None }
    }

    pub fn with_initial_level(side: PositionSide, level: f64) -> Self {
        Self {
            side,
            level: Some(level),
        }
    }

    /// Apply a proposed level and return the ratcheted one.
    ///
    /// The first proposal initialises the level; later proposals are
    /// accepted only when they tighten it.
    pub fn apply(&mut self, proposed: f64) -> f64 {
        let next = match (self.level, self.side) {
            (None, _) => proposed,
            (Some(current), PositionSide::Long) => current.max(proposed),
            (Some(current), PositionSide::Short) => current.min(proposed),
        };
        self.level = Some(next);
        next
    }

    pub fn level(&self) -> Option<f64> {
        self.level
    }

    pub fn side(&self) -> PositionSide {
        self.side
    }
}
