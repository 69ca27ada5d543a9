//! Liquidation-distance estimates for leveraged positions.
//!
//! Isolated-margin approximation with a maintenance-margin rate `mmr`:
//! long liquidates at `entry × (1 − 1/L + mmr)`, short at
//! `entry × (1 + 1/L − mmr)`.

use crate::domain::PositionSide;

pub fn liquidation_price(side: PositionSide, entry: f64, leverage: f64, mmr: f64) -> f64 {
    match side {
        PositionSide::Long => entry * (1.0 - 1.0 / leverage + mmr),
        PositionSide::Short => entry * (1.0 + 1.0 / leverage - mmr),
    }
}

/// True when the stop sits at least `buffer_pct × entry` inside the
/// liquidation price, so the stop fires first.
pub fn stop_is_safe(
    side: PositionSide,
    entry: f64,
    stop: f64,
    leverage: f64,
    mmr: f64,
    buffer_pct: f64,
) -> bool {
    let liq = liquidation_price(side, entry, leverage, mmr);
    let buffer = entry * buffer_pct;
    match side {
        PositionSide::Long => stop >= liq + buffer,
        PositionSide::Short => stop <= liq - buffer,
    }
}

/// Highest leverage at which the stop is still safe.
///
/// Solving the safety condition for `L` gives `1 / (d + mmr + buffer)`
/// where `d` is the stop distance as a fraction of entry, for either side.
pub fn max_safe_leverage(
    side: PositionSide,
    entry: f64,
    stop: f64,
    mmr: f64,
    buffer_pct: f64,
) -> f64 {
    let d = side.favorable_move(stop, entry) / entry;
    let denom = d + mmr + buffer_pct;
    if denom <= 0.0 {
        f64::INFINITY
    } else {
        1.0 / denom
    }
}
