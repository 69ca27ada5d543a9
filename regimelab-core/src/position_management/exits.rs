//! Intrabar exit detection and fill pricing.
//!
//! Gap rule: when the bar opens beyond a level, the fill happens at the open.
//! For stops that is the worse price; for take-profits the better one.
//! An armed trailing stop tighter than the stop-loss replaces it as the
//! protective stop. The protective stop is checked before the target, so a
//! bar whose range covers both always exits at the stop.

use crate::domain::{Bar, ExitReason, Position, PositionSide};

/// Fill price if a protective stop at `level` was touched during `bar`.
pub fn stop_fill(side: PositionSide, level: f64, bar: &Bar) -> Option<f64> {
    match side {
        PositionSide::Long if bar.low <= level => Some(bar.open.min(level)),
        PositionSide::Short if bar.high >= level => Some(bar.open.max(level)),
        _ => None,
    }
}

/// Fill price if a profit target at `level` was touched during `bar`.
pub fn target_fill(side: PositionSide, level: f64, bar: &Bar) -> Option<f64> {
    match side {
        PositionSide::Long if bar.high >= level => Some(bar.open.max(level)),
        PositionSide::Short if bar.low <= level => Some(bar.open.min(level)),
        _ => None,
    }
}

/// The tightest protective stop: the stop-loss, or the armed trail when it
/// sits closer to price.
pub fn effective_stop(position: &Position) -> (ExitReason, f64) {
    let trail = position.trailing.as_ref().and_then(|t| t.trail_price());
    match (position.side, trail) {
        (PositionSide::Long, Some(trail)) if trail > position.stop_loss => {
            (ExitReason::TrailingStop, trail)
        }
        (PositionSide::Short, Some(trail)) if trail < position.stop_loss => {
            (ExitReason::TrailingStop, trail)
        }
        _ => (ExitReason::StopLoss, position.stop_loss),
    }
}

/// Evaluate the effective stop, then the take-profit, against the levels the
/// position carried before this bar.
pub fn protective_exit(position: &Position, bar: &Bar) -> Option<(ExitReason, f64)> {
    let (reason, level) = effective_stop(position);
    if let Some(price) = stop_fill(position.side, level, bar) {
        return Some((reason, price));
    }
    target_fill(position.side, position.take_profit, bar)
        .map(|price| (ExitReason::TakeProfit, price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PositionId, PositionRequest};
    use crate::position_management::{ExitLadder, TrailingStop};
    use crate::regime::Regime;
    use chrono::{TimeZone, Utc};

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            10.0,
        )
    }

    fn long_position(trailing: Option<TrailingStop>) -> Position {
        Position::open(
            PositionId(1),
            PositionRequest {
                side: PositionSide::Long,
                entry_price: 100.0,
                entry_time: Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap(),
                entry_bar: 0,
                quantity: 40.0,
                leverage: 1.0,
                stop_loss: 95.0,
                take_profit: 110.0,
                trailing,
                ladder: ExitLadder::default(),
                risk_reserved: 200.0,
                regime_at_entry: Regime::TrendingUp,
                tier: "moderate".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn stop_fills_at_level_or_gapped_open() {
        let long = PositionSide::Long;
        assert_eq!(stop_fill(long, 95.0, &bar(99.0, 100.0, 94.0, 96.0)), Some(95.0));
        assert_eq!(stop_fill(long, 95.0, &bar(92.0, 93.0, 90.0, 91.0)), Some(92.0));
        assert_eq!(stop_fill(long, 95.0, &bar(99.0, 100.0, 96.0, 97.0)), None);
        let gapped = bar(108.0, 109.0, 107.0, 108.0);
        assert_eq!(stop_fill(PositionSide::Short, 105.0, &gapped), Some(108.0));
    }

    #[test]
    fn target_gap_fills_at_better_open() {
        let gapped = bar(112.0, 113.0, 111.0, 112.0);
        assert_eq!(target_fill(PositionSide::Long, 110.0, &gapped), Some(112.0));
        let touched = bar(95.0, 96.0, 89.0, 90.5);
        assert_eq!(target_fill(PositionSide::Short, 90.0, &touched), Some(90.0));
    }

    #[test]
    fn stop_wins_when_both_levels_touched() {
        let pos = long_position(None);
        let wide = bar(100.0, 111.0, 94.0, 105.0);
        assert_eq!(protective_exit(&pos, &wide), Some((ExitReason::StopLoss, 95.0)));
    }

    #[test]
    fn unarmed_trailing_is_ignored() {
        let pos = long_position(Some(TrailingStop::new(PositionSide::Long, 100.0, 0.05, 0.02)));
        assert_eq!(protective_exit(&pos, &bar(100.0, 101.0, 96.0, 97.0)), None);
    }

    #[test]
    fn armed_trailing_exits() {
        let mut trailing = TrailingStop::new(PositionSide::Long, 100.0, 0.05, 0.02);
        trailing.update(108.0, 104.0);
        let pos = long_position(Some(trailing));
        let (reason, price) = protective_exit(&pos, &bar(107.0, 107.5, 105.0, 105.5)).unwrap();
        assert_eq!(reason, ExitReason::TrailingStop);
        assert!((price - 105.84).abs() < 1e-9);
    }

    fn armed_long() -> Position {
        let mut trailing = TrailingStop::new(PositionSide::Long, 100.0, 0.05, 0.02);
        trailing.update(108.0, 104.0);
        long_position(Some(trailing))
    }

    #[test]
    fn trail_binds_when_bar_falls_through_both_stops() {
        let deep = bar(107.0, 107.5, 94.0, 96.0);
        let (reason, price) = protective_exit(&armed_long(), &deep).unwrap();
        assert_eq!(reason, ExitReason::TrailingStop);
        assert!((price - 105.84).abs() < 1e-9);
    }

    #[test]
    fn trail_beats_target_in_the_same_bar() {
        let wide = bar(107.0, 111.0, 105.0, 110.5);
        let (reason, price) = protective_exit(&armed_long(), &wide).unwrap();
        assert_eq!(reason, ExitReason::TrailingStop);
        assert!((price - 105.84).abs() < 1e-9);
    }

    #[test]
    fn trail_below_stop_leaves_stop_loss_binding() {
        let mut trailing = TrailingStop::new(PositionSide::Long, 100.0, 0.01, 0.10);
        trailing.update(101.0, 100.5);
        let pos = long_position(Some(trailing));
        assert_eq!(effective_stop(&pos), (ExitReason::StopLoss, 95.0));
    }

    #[test]
    fn short_trail_gapped_through_fills_at_open() {
        let mut trailing = TrailingStop::new(PositionSide::Short, 100.0, 0.05, 0.02);
        trailing.update(96.0, 92.0);
        let mut pos = long_position(Some(trailing));
        pos.side = PositionSide::Short;
        pos.stop_loss = 105.0;
        pos.take_profit = 90.0;
        let trail = pos.trailing.as_ref().and_then(|t| t.trail_price()).unwrap();
        assert!(trail < 105.0);
        let (reason, price) = protective_exit(&pos, &bar(99.0, 99.5, 98.0, 99.0)).unwrap();
        assert_eq!(reason, ExitReason::TrailingStop);
        assert_eq!(price, 99.0);
    }
}
