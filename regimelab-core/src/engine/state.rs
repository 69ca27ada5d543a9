//! Mutable per-run state: bar windows, accounting and diagnostics counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, EquityPoint, TradeRecord};
use crate::error::EngineError;

/// Outcome of offering a bar to a [`BarWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Same timestamp as the newest bar; secondary timeframes repeat their
    /// latest bar until the next one closes.
    Duplicate,
}

/// Bounded trailing window of bars, oldest first.
///
/// Backed by a `Vec` that is compacted once it grows to twice the capacity,
/// so the trailing slice is always contiguous.
#[derive(Debug, Clone)]
pub struct BarWindow {
    capacity: usize,
    bars: Vec<Bar>,
}

impl BarWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            bars: Vec::with_capacity(capacity * 2),
        }
    }

    /// Check ordering without mutating. Older bars are fatal.
    pub fn admit(&self, bar: &Bar, allow_duplicate: bool) -> Result<Admission, EngineError> {
        match self.bars.last() {
            Some(last) if bar.timestamp < last.timestamp => Err(EngineError::OutOfOrderBar {
                previous: last.timestamp,
                current: bar.timestamp,
            }),
            Some(last) if bar.timestamp == last.timestamp => {
                if allow_duplicate {
                    Ok(Admission::Duplicate)
                } else {
                    Err(EngineError::OutOfOrderBar {
                        previous: last.timestamp,
                        current: bar.timestamp,
                    })
                }
            }
            _ => Ok(Admission::Accepted),
        }
    }

    pub fn push(&mut self, bar: Bar) {
        if self.bars.len() >= self.capacity * 2 {
            let excess = self.bars.len() - self.capacity + 1;
            self.bars.drain(..excess);
        }
        self.bars.push(bar);
    }

    /// The trailing `capacity` bars, oldest first; the current bar is last.
    pub fn as_slice(&self) -> &[Bar] {
        let start = self.bars.len().saturating_sub(self.capacity);
        &self.bars[start..]
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len().min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }
}

/// Counters describing what the engine did (and declined to do).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub bars_processed: usize,
    /// Bars whose window was too short to classify (regime defaulted).
    pub insufficient_data_bars: usize,
    /// Actionable (non-flat) signals.
    pub signals: usize,
    /// Directional composites suppressed by the alignment filter.
    pub filtered_signals: usize,
    /// Actionable signals in regimes with trading disabled.
    pub disabled_regime_signals: usize,
    /// Signals ignored because the position cap was reached.
    pub capacity_skips: usize,
    /// Signals ignored because an opposite-side position was open.
    pub conflict_skips: usize,
    pub no_risk_capacity: usize,
    /// Entries rejected by the sizer or position validation.
    pub rejected_entries: usize,
    pub liquidation_rescales: usize,
    pub positions_opened: usize,
    pub risk_limit_closes: usize,
    pub allocation_rounds: usize,
}

/// Accounting state that evolves bar by bar.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub bar_index: usize,
    pub initial_equity: f64,
    pub realized_pnl: f64,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub diagnostics: Diagnostics,
}

impl EngineState {
    pub fn new(initial_equity: f64) -> Self {
        Self {
            bar_index: 0,
            initial_equity,
            realized_pnl: 0.0,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Equity given the open positions' unrealised P&L.
    pub fn equity(&self, unrealized: f64) -> f64 {
        self.initial_equity + self.realized_pnl + unrealized
    }

    pub fn last_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map_or(self.initial_equity, |p| p.equity)
    }
}
