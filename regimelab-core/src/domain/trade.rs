//! TradeRecord: an immutable, append-only trade-log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PositionId, TradeId};
use super::position::PositionSide;
use crate::regime::Regime;

/// Why a position (or part of one) was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    /// A ladder rung fired; `rung` is its index in the ladder.
    PartialTakeProfit { rung: usize },
    SignalReversal,
    TimeExit,
    /// Forced de-risking when the aggregate risk ceiling is breached.
    RiskLimit,
    EndOfData,
}

impl ExitReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::TrailingStop => "trailing_stop",
            Self::PartialTakeProfit { .. } => "partial_take_profit",
            Self::SignalReversal => "signal_reversal",
            Self::TimeExit => "time_exit",
            Self::RiskLimit => "risk_limit",
            Self::EndOfData => "end_of_data",
        }
    }
}

/// A realised exit: the whole position or one ladder portion of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    // ── Identification ──
    pub id: TradeId,
    pub position_id: PositionId,
    pub side: PositionSide,
    pub tier: String,
    pub regime_at_entry: Regime,

    // ── Entry ──
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    /// True when the position stayed open after this exit.
    pub is_partial: bool,

    // ── Size ──
    pub quantity: f64,
    pub leverage: f64,

    // ── PnL ──
    pub realized_pnl: f64,
    /// Return on margin: `sign × (exit − entry) / entry × leverage`.
    pub pnl_pct: f64,

    // ── Duration / excursion ──
    pub bars_held: usize,
    pub mae: f64,
    pub mfe: f64,
}

impl TradeRecord {
    pub fn is_winner(&self) -> bool {
        self.realized_pnl > 0.0
    }

    pub fn holding_secs(&self) -> i64 {
        (self.exit_time - self.entry_time).num_seconds()
    }
}
