//! Position lifecycle manager.
//!
//! Owns every live position and drives it through
//! `Opening → Open → PartiallyClosed* → Closed` one bar at a time.
//!
//! Per bar and per position:
//! 1. effective stop (stop-loss or a tighter armed trail), then take-profit,
//!    using levels from before the bar
//! 2. ladder rungs, ascending, at the trigger or a favourably gapped open
//! 3. trailing arm/update from the bar's favourable extreme (ratchet)
//! 4. opposing signal, then the holding-time limit, both at the close
//!
//! End-of-data and risk-limit closes are requested by the engine.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::exits::{protective_exit, target_fill};
use crate::config::LifecycleConfig;
use crate::domain::{
    Bar, ExitReason, IdGen, Position, PositionId, PositionRequest, PositionSide, TradeRecord,
};
use crate::error::EngineError;

/// A realised exit plus the risk reservation it released.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitEvent {
    pub trade: TradeRecord,
    pub freed_risk: f64,
    /// True when this exit closed the position.
    pub closed: bool,
}

#[derive(Debug, Clone)]
pub struct LifecycleManager {
    config: LifecycleConfig,
    positions: Vec<Position>,
    ids: IdGen,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            positions: Vec::new(),
            ids: IdGen::default(),
        }
    }

    /// Live positions, oldest first.
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.positions.len() < self.config.max_open_positions
    }

    pub fn has_side(&self, side: PositionSide) -> bool {
        self.positions.iter().any(|p| p.side == side)
    }

    pub fn reserved_risk(&self) -> f64 {
        self.positions.iter().map(|p| p.risk_reserved).sum()
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.positions.iter().map(|p| p.unrealized_pnl(mark)).sum()
    }

    /// Validate, create and activate a position.
    pub fn open(&mut self, request: PositionRequest) -> Result<PositionId, EngineError> {
        let mut position = Position::open(self.ids.next_position_id(), request)?;
        position.activate();
        debug!(
            id = %position.id,
            side = ?position.side,
            entry = position.entry_price,
            qty = position.quantity,
            stop = position.stop_loss,
            target = position.take_profit,
            tier = %position.tier,
            "position opened"
        );
        let id = position.id;
        self.positions.push(position);
        Ok(id)
    }

    /// Evaluate every live position against `bar`.
    ///
    /// `signal_side` is the side of this bar's actionable signal, if any; a
    /// position on the other side is closed when reversal exits are enabled.
    pub fn update(&mut self, bar: &Bar, signal_side: Option<PositionSide>) -> Vec<ExitEvent> {
        let Self {
            config,
            positions,
            ids,
        } = self;
        let mut events = Vec::new();

        'positions: for pos in positions.iter_mut() {
            pos.observe_bar(bar.high, bar.low);

            if let Some((reason, price)) = protective_exit(pos, bar) {
                let qty = pos.quantity;
                events.push(realize(pos, ids, qty, price, bar.timestamp, reason));
                continue;
            }

            let side = pos.side;
            let entry = pos.entry_price;
            for rung_idx in pos.ladder.triggered(side, entry, bar.high, bar.low) {
                let Some((portion, trigger)) = pos
                    .ladder
                    .consume(rung_idx)
                    .map(|r| (r.portion, r.trigger_price(side, entry)))
                else {
                    continue;
                };
                let price = target_fill(side, trigger, bar).unwrap_or(trigger);
                let qty = (pos.original_quantity * portion).min(pos.quantity);
                let reason = ExitReason::PartialTakeProfit { rung: rung_idx };
                let event = realize(pos, ids, qty, price, bar.timestamp, reason);
                let closed = event.closed;
                events.push(event);
                if closed {
                    continue 'positions;
                }
            }

            if let Some(trailing) = pos.trailing.as_mut() {
                if trailing.update(bar.high, bar.low) {
                    debug!(
                        id = %pos.id,
                        activation = trailing.activation_price,
                        "trailing stop armed"
                    );
                }
            }

            let qty = pos.quantity;
            if config.reversal_exit && signal_side == Some(side.opposite()) {
                let reason = ExitReason::SignalReversal;
                events.push(realize(pos, ids, qty, bar.close, bar.timestamp, reason));
                continue;
            }

            if let Some(max_bars) = config.max_holding_bars {
                if pos.bars_held >= max_bars {
                    let reason = ExitReason::TimeExit;
                    events.push(realize(pos, ids, qty, bar.close, bar.timestamp, reason));
                }
            }
        }

        self.positions.retain(Position::is_live);
        events
    }

    /// Close the most recently opened position at `bar.close`.
    pub fn close_newest(&mut self, bar: &Bar, reason: ExitReason) -> Option<ExitEvent> {
        let mut pos = self.positions.pop()?;
        let qty = pos.quantity;
        let event = realize(&mut pos, &mut self.ids, qty, bar.close, bar.timestamp, reason);
        Some(event)
    }

    /// Close everything at `bar.close`, oldest first.
    pub fn close_all(&mut self, bar: &Bar, reason: ExitReason) -> Vec<ExitEvent> {
        let ids = &mut self.ids;
        self.positions
            .drain(..)
            .map(|mut pos| {
                let qty = pos.quantity;
                realize(&mut pos, ids, qty, bar.close, bar.timestamp, reason)
            })
            .collect()
    }
}

/// Exit `quantity` units of `pos` at `price` and build the trade record.
fn realize(
    pos: &mut Position,
    ids: &mut IdGen,
    quantity: f64,
    price: f64,
    time: DateTime<Utc>,
    reason: ExitReason,
) -> ExitEvent {
    let quantity = quantity.min(pos.quantity);
    let realized_pnl = pos.pnl_at(price, quantity);
    let mut freed_risk = pos.reduce(quantity);
    let closed = pos.quantity <= 0.0;
    if closed {
        freed_risk += pos.close();
    }

    let trade = TradeRecord {
        id: ids.next_trade_id(),
        position_id: pos.id,
        side: pos.side,
        tier: pos.tier.clone(),
        regime_at_entry: pos.regime_at_entry,
        entry_time: pos.entry_time,
        entry_price: pos.entry_price,
        exit_time: time,
        exit_price: price,
        exit_reason: reason,
        is_partial: !closed,
        quantity,
        leverage: pos.leverage,
        realized_pnl,
        pnl_pct: pos.side.favorable_move(pos.entry_price, price) / pos.entry_price * pos.leverage,
        bars_held: pos.bars_held,
        mae: pos.mae(),
        mfe: pos.mfe(),
    };
    debug!(
        id = %pos.id,
        reason = reason.label(),
        price,
        qty = quantity,
        pnl = realized_pnl,
        partial = !closed,
        "position exit"
    );
    ExitEvent {
        trade,
        freed_risk,
        closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PositionState;
    use crate::position_management::{ExitLadder, LadderRung, TrailingStop};
    use crate::regime::Regime;
    use chrono::{Duration, TimeZone};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(t(i), open, high, low, close, 1.0)
    }

    fn request(side: PositionSide) -> PositionRequest {
        let (stop, target) = match side {
            PositionSide::Long => (95.0, 110.0),
            PositionSide::Short => (105.0, 90.0),
        };
        PositionRequest {
            side,
            entry_price: 100.0,
            entry_time: t(0),
            entry_bar: 0,
            quantity: 40.0,
            leverage: 1.0,
            stop_loss: stop,
            take_profit: target,
            trailing: None,
            ladder: ExitLadder::default(),
            risk_reserved: 200.0,
            regime_at_entry: Regime::TrendingUp,
            tier: "moderate".into(),
        }
    }

    fn manager() -> LifecycleManager {
        LifecycleManager::new(LifecycleConfig::default())
    }

    #[test]
    fn take_profit_realises_reference_pnl() {
        let mut m = manager();
        m.open(request(PositionSide::Long)).unwrap();
        assert_eq!(m.positions()[0].state, PositionState::Open);
        let events = m.update(&bar(1, 105.0, 110.0, 104.0, 108.0), None);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.trade.exit_reason, ExitReason::TakeProfit);
        assert_eq!(e.trade.exit_price, 110.0);
        assert!((e.trade.realized_pnl - 400.0).abs() < 1e-9);
        assert!((e.freed_risk - 200.0).abs() < 1e-9);
        assert!(e.closed && !e.trade.is_partial);
        assert_eq!(m.open_count(), 0);
    }

    #[test]
    fn stop_beats_target_inside_one_bar() {
        let mut m = manager();
        m.open(request(PositionSide::Long)).unwrap();
        let events = m.update(&bar(1, 100.0, 111.0, 94.0, 100.0), None);
        assert_eq!(events[0].trade.exit_reason, ExitReason::StopLoss);
        assert!((events[0].trade.realized_pnl + 200.0).abs() < 1e-9);
    }

    #[test]
    fn ladder_releases_portions_then_closes() {
        let mut m = manager();
        let mut req = request(PositionSide::Long);
        req.take_profit = 150.0;
        req.ladder = ExitLadder::new(vec![LadderRung::new(0.02, 0.5), LadderRung::new(0.04, 0.5)]);
        m.open(req).unwrap();

        let first = m.update(&bar(1, 100.0, 102.5, 99.0, 102.0), None);
        assert_eq!(first.len(), 1);
        assert!(first[0].trade.is_partial);
        assert_eq!(first[0].trade.exit_price, 102.0);
        assert!((first[0].trade.quantity - 20.0).abs() < 1e-9);
        assert!((first[0].freed_risk - 100.0).abs() < 1e-9);
        assert_eq!(m.positions()[0].state, PositionState::PartiallyClosed);

        let second = m.update(&bar(2, 102.0, 104.5, 101.0, 104.0), None);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].trade.exit_reason, ExitReason::PartialTakeProfit { rung: 1 });
        assert!(second[0].closed);
        assert_eq!(m.open_count(), 0);
    }

    #[test]
    fn trailing_arms_then_exits_on_pullback() {
        let mut m = manager();
        let mut req = request(PositionSide::Long);
        req.take_profit = 150.0;
        req.trailing = Some(TrailingStop::new(PositionSide::Long, 100.0, 0.05, 0.02));
        m.open(req).unwrap();

        assert!(m.update(&bar(1, 101.0, 108.0, 100.5, 107.0), None).is_empty());
        let trail = m.positions()[0].trailing.as_ref().and_then(|t| t.trail_price()).unwrap();
        assert!((trail - 105.84).abs() < 1e-9);

        let events = m.update(&bar(2, 107.0, 107.5, 105.0, 105.5), None);
        assert_eq!(events[0].trade.exit_reason, ExitReason::TrailingStop);
        assert!(events[0].trade.realized_pnl > 0.0);
    }

    #[test]
    fn ladder_rung_gapped_through_fills_at_open() {
        let mut m = manager();
        let mut req = request(PositionSide::Long);
        req.take_profit = 150.0;
        req.ladder = ExitLadder::new(vec![LadderRung::new(0.02, 0.5)]);
        m.open(req).unwrap();

        let events = m.update(&bar(1, 105.0, 106.0, 104.0, 105.5), None);
        assert_eq!(events.len(), 1);
        let trade = &events[0].trade;
        assert_eq!(trade.exit_reason, ExitReason::PartialTakeProfit { rung: 0 });
        assert_eq!(trade.exit_price, 105.0);
        assert!((trade.realized_pnl - 100.0).abs() < 1e-9);
    }

    #[test]
    fn armed_trail_exits_before_old_stop_on_a_deep_bar() {
        let mut m = manager();
        let mut req = request(PositionSide::Long);
        req.trailing = Some(TrailingStop::new(PositionSide::Long, 100.0, 0.05, 0.02));
        m.open(req).unwrap();
        assert!(m.update(&bar(1, 101.0, 108.0, 100.5, 107.0), None).is_empty());

        let events = m.update(&bar(2, 107.0, 107.5, 94.0, 96.0), None);
        assert_eq!(events.len(), 1);
        let trade = &events[0].trade;
        assert_eq!(trade.exit_reason, ExitReason::TrailingStop);
        assert!((trade.exit_price - 105.84).abs() < 1e-9);
        assert!((trade.realized_pnl - 233.6).abs() < 1e-6);
    }

    #[test]
    fn opposing_signal_closes_at_close() {
        let mut m = manager();
        m.open(request(PositionSide::Short)).unwrap();
        let events = m.update(&bar(1, 100.0, 101.0, 99.0, 100.5), Some(PositionSide::Long));
        assert_eq!(events[0].trade.exit_reason, ExitReason::SignalReversal);
        assert_eq!(events[0].trade.exit_price, 100.5);
        assert!(events[0].trade.realized_pnl < 0.0);
    }

    #[test]
    fn same_side_signal_keeps_position() {
        let mut m = manager();
        m.open(request(PositionSide::Long)).unwrap();
        assert!(m.update(&bar(1, 100.0, 101.0, 99.0, 100.5), Some(PositionSide::Long)).is_empty());
    }

    #[test]
    fn holding_limit_triggers_time_exit() {
        let mut m = LifecycleManager::new(LifecycleConfig {
            max_holding_bars: Some(2),
            ..LifecycleConfig::default()
        });
        m.open(request(PositionSide::Long)).unwrap();
        assert!(m.update(&bar(1, 100.0, 101.0, 99.0, 100.0), None).is_empty());
        let events = m.update(&bar(2, 100.0, 101.0, 99.0, 100.2), None);
        assert_eq!(events[0].trade.exit_reason, ExitReason::TimeExit);
        assert_eq!(events[0].trade.bars_held, 2);
    }

    #[test]
    fn close_newest_and_close_all() {
        let mut m = LifecycleManager::new(LifecycleConfig {
            max_open_positions: 3,
            ..LifecycleConfig::default()
        });
        let first = m.open(request(PositionSide::Long)).unwrap();
        let second = m.open(request(PositionSide::Long)).unwrap();
        assert!(second > first);
        assert!((m.reserved_risk() - 400.0).abs() < 1e-9);

        let e = m.close_newest(&bar(1, 100.0, 101.0, 99.0, 101.0), ExitReason::RiskLimit).unwrap();
        assert_eq!(e.trade.position_id, second);
        assert_eq!(m.open_count(), 1);

        let rest = m.close_all(&bar(2, 101.0, 102.0, 100.0, 102.0), ExitReason::EndOfData);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].trade.exit_reason, ExitReason::EndOfData);
        assert_eq!(m.reserved_risk(), 0.0);
    }

    #[test]
    fn invalid_request_is_not_opened() {
        let mut m = manager();
        let mut req = request(PositionSide::Long);
        req.stop_loss = 101.0;
        assert!(m.open(req).is_err());
        assert_eq!(m.open_count(), 0);
    }
}
