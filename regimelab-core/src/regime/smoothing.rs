//! Majority-vote smoothing over the last N raw classifications.

use std::collections::VecDeque;

use super::Regime;

/// Rolling majority vote. Ties go to the most recent classification among
/// the tied regimes, so a length of 1 is a pass-through.
#[derive(Debug, Clone)]
pub struct RegimeSmoother {
    length: usize,
    history: VecDeque<Regime>,
}

impl RegimeSmoother {
    pub fn new(length: usize) -> Self {
        let length = length.max(1);
        Self {
            length,
            history: VecDeque::with_capacity(length),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Push a raw classification and return the smoothed one.
    pub fn push(&mut self, raw: Regime) -> Regime {
        if self.history.len() == self.length {
            self.history.pop_front();
        }
        self.history.push_back(raw);
        self.current().unwrap_or(raw)
    }

    /// Current smoothed value, `None` before the first push.
    pub fn current(&self) -> Option<Regime> {
        let mut counts = [0usize; Regime::ALL.len()];
        let mut last_seen = [0usize; Regime::ALL.len()];
        for (i, r) in self.history.iter().enumerate() {
            let slot = slot_of(*r);
            counts[slot] += 1;
            last_seen[slot] = i;
        }
        Regime::ALL
            .iter()
            .copied()
            .filter(|r| counts[slot_of(*r)] > 0)
            .max_by_key(|r| (counts[slot_of(*r)], last_seen[slot_of(*r)]))
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

fn slot_of(regime: Regime) -> usize {
    match regime {
        Regime::TrendingUp => 0,
        Regime::TrendingDown => 1,
        Regime::Ranging => 2,
        Regime::Volatile => 3,
        Regime::Quiet => 4,
    }
}
