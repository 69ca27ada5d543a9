//! Partial take-profit ladder.
//!
//! Rungs are kept sorted by ascending trigger distance and each one fires at
//! most once. Portions are fractions of the position's original quantity.

use serde::{Deserialize, Serialize};

use crate::domain::PositionSide;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderRung {
    /// Favourable move from entry, as a fraction (0.03 = 3%).
    pub trigger_pct: f64,
    /// Fraction of the original quantity released by this rung.
    pub portion: f64,
    #[serde(default)]
    pub consumed: bool,
}

impl LadderRung {
    pub fn new(trigger_pct: f64, portion: f64) -> Self {
        Self {
            trigger_pct,
            portion,
            consumed: false,
        }
    }

    pub fn trigger_price(&self, side: PositionSide, entry_price: f64) -> f64 {
        match side {
            PositionSide::Long => entry_price * (1.0 + self.trigger_pct),
            PositionSide::Short => entry_price * (1.0 - self.trigger_pct),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitLadder {
    rungs: Vec<LadderRung>,
}

impl ExitLadder {
    pub fn new(mut rungs: Vec<LadderRung>) -> Self {
        rungs.sort_by(|a, b| a.trigger_pct.total_cmp(&b.trigger_pct));
        Self { rungs }
    }

    pub fn rungs(&self) -> &[LadderRung] {
        &self.rungs
    }

    pub fn is_empty(&self) -> bool {
        self.rungs.is_empty()
    }

    pub fn total_portion(&self) -> f64 {
        self.rungs.iter().map(|r| r.portion).sum()
    }

    pub fn consumed_portion(&self) -> f64 {
        self.rungs
            .iter()
            .filter(|r| r.consumed)
            .map(|r| r.portion)
            .sum()
    }

    /// Indices of unconsumed rungs whose trigger lies inside `[low, high]`
    /// on the favourable side, in ascending trigger order.
    pub fn triggered(
        &self,
        side: PositionSide,
        entry_price: f64,
        high: f64,
        low: f64,
    ) -> Vec<usize> {
        self.rungs
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.consumed)
            .filter(|(_, r)| {
                let trigger = r.trigger_price(side, entry_price);
                match side {
                    PositionSide::Long => high >= trigger,
                    PositionSide::Short => low <= trigger,
                }
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Mark a rung consumed and return it. `None` if already consumed or out of range.
    pub fn consume(&mut self, index: usize) -> Option<&LadderRung> {
        let rung = self.rungs.get_mut(index)?;
        if rung.consumed {
            return None;
        }
        rung.consumed = true;
        Some(rung)
    }
}
