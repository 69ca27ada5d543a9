//! Portfolio risk budget: the running sum of reservations held by open
//! positions, checked against a ceiling expressed as a fraction of equity.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskBudget {
    in_use: f64,
}

impl RiskBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_use(&self) -> f64 {
        self.in_use
    }

    pub fn reserve(&mut self, amount: f64) {
        self.in_use += amount.max(0.0);
    }

    /// Release a reservation. Never drops below zero.
    pub fn release(&mut self, amount: f64) {
        self.in_use = (self.in_use - amount.max(0.0)).max(0.0);
        if self.in_use < 1e-9 {
            self.in_use = 0.0;
        }
    }

    pub fn ceiling(equity: f64, max_pct: f64) -> f64 {
        (equity * max_pct).max(0.0)
    }

    pub fn headroom(&self, equity: f64, max_pct: f64) -> f64 {
        Self::ceiling(equity, max_pct) - self.in_use
    }

    /// True when reservations exceed the ceiling (with a small tolerance).
    pub fn is_breached(&self, equity: f64, max_pct: f64) -> bool {
        self.in_use > Self::ceiling(equity, max_pct) + 1e-9
    }
}
