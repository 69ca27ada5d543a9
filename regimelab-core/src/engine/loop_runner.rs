//! Bar-by-bar event loop.
//!
//! Per bar, strictly in this order:
//! 1. Validate and window the bar (fatal on malformed or out-of-order input)
//! 2. Classify the regime and smooth it
//! 3. Aggregate the multi-timeframe signal for that regime
//! 4. Run open positions through the lifecycle (exits release risk and feed
//!    the allocator)
//! 5. Mark equity, then force-close the newest positions while the
//!    portfolio risk ceiling is breached
//! 6. Size and open a new position if the signal is actionable
//! 7. Allocator cadence, then append exactly one equity point

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::result::{AbortedRun, BacktestError, BarOutcome, RegimeMark, RunResult};
use super::state::{Admission, BarWindow, EngineState};
use crate::allocator::{PortfolioRiskAllocator, RiskBudget};
use crate::components::{RegimeAggregators, Signal, TimeframeInput};
use crate::config::EngineConfig;
use crate::domain::{
    Bar, EquityPoint, ExitReason, PositionId, PositionRequest, PositionSide, TradeRecord,
};
use crate::error::{ConfigError, EngineError};
use crate::fingerprint::{ConfigHash, DatasetHasher, RunFingerprint};
use crate::position_management::{ExitEvent, ExitLadder, LadderRung, LifecycleManager, TrailingStop};
use crate::regime::{Regime, RegimeClassifier, RegimeSmoother, WindowMetrics};
use crate::sizers::{RiskSizer, SizingRequest};

const PRIMARY_TIMEFRAME: &str = "primary";

/// One engine instance per run. Owns every piece of mutable run state.
pub struct Engine {
    config: EngineConfig,
    classifier: RegimeClassifier,
    smoother: RegimeSmoother,
    aggregators: RegimeAggregators,
    sizer: RiskSizer,
    lifecycle: LifecycleManager,
    allocator: PortfolioRiskAllocator,
    budget: RiskBudget,
    primary: BarWindow,
    secondary: Vec<BarWindow>,
    state: EngineState,
    regimes: Vec<RegimeMark>,
    config_hash: ConfigHash,
    dataset: DatasetHasher,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let config_hash = config.config_hash()?;
        let history = config.history_len();

        Ok(Self {
            classifier: RegimeClassifier::new(config.classifier.clone()),
            smoother: RegimeSmoother::new(config.classifier.smoothing),
            aggregators: RegimeAggregators::from_configs(&config.regimes),
            sizer: RiskSizer::new(config.sizing.clone()),
            lifecycle: LifecycleManager::new(config.lifecycle.clone()),
            allocator: PortfolioRiskAllocator::new(&config.tiers, &config.allocator)?,
            budget: RiskBudget::new(),
            primary: BarWindow::new(history),
            secondary: config
                .timeframes
                .iter()
                .map(|_| BarWindow::new(history))
                .collect(),
            state: EngineState::new(config.portfolio.initial_equity),
            regimes: Vec::new(),
            config_hash,
            dataset: DatasetHasher::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of bars processed so far.
    pub fn bar_count(&self) -> usize {
        self.state.equity_curve.len()
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn allocator(&self) -> &PortfolioRiskAllocator {
        &self.allocator
    }

    pub fn risk_in_use(&self) -> f64 {
        self.budget.in_use()
    }

    /// Equity at the last processed close.
    pub fn equity(&self) -> f64 {
        self.state.last_equity()
    }

    /// Process one primary bar. `secondary` holds the latest closed bar of
    /// each configured secondary timeframe, in configuration order; a bar
    /// repeating the previous timestamp is ignored.
    ///
    /// Fatal errors leave the engine exactly as it was before the call.
    pub fn process_bar(&mut self, bar: &Bar, secondary: &[Bar]) -> Result<BarOutcome, EngineError> {
        // ── Validation (no mutation before this block passes) ──
        bar.validate()?;
        self.primary.admit(bar, false)?;
        let mut admitted = Vec::with_capacity(secondary.len());
        for (window, sbar) in self.secondary.iter().zip(secondary) {
            sbar.validate()?;
            admitted.push(window.admit(sbar, true)? == Admission::Accepted);
        }

        let bar_index = self.state.bar_index;
        self.dataset.push(0, bar);
        self.primary.push(bar.clone());
        for (i, ((window, sbar), accepted)) in self
            .secondary
            .iter_mut()
            .zip(secondary)
            .zip(admitted)
            .enumerate()
        {
            if accepted {
                self.dataset.push(i as u32 + 1, sbar);
                window.push(sbar.clone());
            }
        }

        // ── Regime ──
        let history = self.primary.as_slice();
        let raw = match self.classifier.classify(history) {
            Ok(regime) => regime,
            Err(_) => {
                self.state.diagnostics.insufficient_data_bars += 1;
                Regime::Ranging
            }
        };
        let regime = self.smoother.push(raw);
        let mark = RegimeMark {
            timestamp: bar.timestamp,
            raw,
            regime,
        };
        self.regimes.push(mark);

        // ── Signal ──
        let signal = self.aggregate(regime, bar.timestamp);
        if signal.is_actionable() {
            self.state.diagnostics.signals += 1;
        }
        if signal.filtered {
            self.state.diagnostics.filtered_signals += 1;
        }
        let signal_side = signal.direction.side();

        // ── Lifecycle ──
        let mut exits = Vec::new();
        let events = self.lifecycle.update(bar, signal_side);
        self.apply_exits(events, &mut exits);

        // ── Mark and de-risk ──
        let mut equity = self.mark(bar.close);
        let ceiling_pct = self.config.portfolio.max_aggregate_risk_pct;
        while self.budget.is_breached(equity, ceiling_pct) {
            let Some(event) = self.lifecycle.close_newest(bar, ExitReason::RiskLimit) else {
                break;
            };
            warn!(
                position = %event.trade.position_id,
                in_use = self.budget.in_use(),
                ceiling = RiskBudget::ceiling(equity, ceiling_pct),
                "aggregate risk ceiling breached, closing newest position"
            );
            self.state.diagnostics.risk_limit_closes += 1;
            self.apply_exits(vec![event], &mut exits);
            equity = self.mark(bar.close);
        }

        // ── Entry ──
        let (opened, rejection) = match signal_side {
            Some(side) => self.try_enter(bar, bar_index, side, signal.strength, regime, equity),
            None => (None, None),
        };

        // ── Allocation and equity ──
        let reallocated = self.allocator.on_bar_end(bar_index, bar.timestamp);
        if reallocated {
            self.state.diagnostics.allocation_rounds += 1;
        }
        self.state.equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            equity,
        });
        self.state.diagnostics.bars_processed += 1;
        self.state.bar_index += 1;

        Ok(BarOutcome {
            bar_index,
            regime: mark,
            signal,
            exits,
            opened,
            rejection,
            equity,
            reallocated,
        })
    }

    /// Close everything at the last processed bar and return the result.
    pub fn finish(mut self) -> RunResult {
        if let Some(last) = self.primary.last().cloned() {
            let events = self.lifecycle.close_all(&last, ExitReason::EndOfData);
            let mut exits = Vec::new();
            self.apply_exits(events, &mut exits);
            let equity = self.mark(last.close);
            if let Some(point) = self.state.equity_curve.last_mut() {
                point.equity = equity;
            }
        }
        let result = self.snapshot();
        info!(
            bars = result.bar_count(),
            trades = result.trades.len(),
            final_equity = result.final_equity,
            run_id = %result.fingerprint.run_id,
            "run finished"
        );
        result
    }

    /// Current state as a result, without forcing any exits.
    pub fn snapshot(&self) -> RunResult {
        RunResult {
            trades: self.state.trades.clone(),
            equity_curve: self.state.equity_curve.clone(),
            open_positions: self.lifecycle.positions().to_vec(),
            regimes: self.regimes.clone(),
            allocation_history: self.allocator.history().to_vec(),
            tier_weights: self.allocator.weights(),
            tier_stats: self.allocator.lifetime_stats(),
            diagnostics: self.state.diagnostics.clone(),
            initial_equity: self.state.initial_equity,
            final_equity: self.state.last_equity(),
            fingerprint: RunFingerprint::new(self.config_hash.clone(), self.dataset.finish()),
        }
    }

    // ── Internals ──

    fn mark(&self, price: f64) -> f64 {
        self.state.equity(self.lifecycle.unrealized_pnl(price))
    }

    fn aggregate(&self, regime: Regime, timestamp: DateTime<Utc>) -> Signal {
        let Some(aggregator) = self.aggregators.get(regime) else {
            return Signal::flat(timestamp, regime);
        };
        let mut inputs = Vec::with_capacity(1 + self.secondary.len());
        inputs.push(TimeframeInput {
            name: PRIMARY_TIMEFRAME,
            weight: self.config.primary_weight,
            history: self.primary.as_slice(),
        });
        for (tf, window) in self.config.timeframes.iter().zip(&self.secondary) {
            if !window.is_empty() {
                inputs.push(TimeframeInput {
                    name: &tf.name,
                    weight: tf.weight,
                    history: window.as_slice(),
                });
            }
        }
        aggregator.aggregate(&inputs, regime, self.config.regimes.get(regime), timestamp)
    }

    fn apply_exits(&mut self, events: Vec<ExitEvent>, exits: &mut Vec<TradeRecord>) {
        for event in events {
            self.budget.release(event.freed_risk);
            self.state.realized_pnl += event.trade.realized_pnl;
            self.allocator
                .record_trade(&event.trade.tier, event.trade.realized_pnl);
            exits.push(event.trade.clone());
            self.state.trades.push(event.trade);
        }
    }

    /// ATR from the bar's snapshot, else the mean true range of the window.
    fn atr(&self, bar: &Bar) -> Option<f64> {
        bar.indicator(&self.config.atr_key).or_else(|| {
            let history = self.primary.as_slice();
            let w = self.classifier.window().min(history.len());
            (w > 0)
                .then(|| WindowMetrics::compute(&history[history.len() - w..]).mean_true_range)
                .filter(|tr| *tr > 0.0)
        })
    }

    /// Entries fill at the close. Returns the new position, or the error
    /// that stopped an actionable signal from becoming one.
    fn try_enter(
        &mut self,
        bar: &Bar,
        bar_index: usize,
        side: PositionSide,
        strength: f64,
        regime: Regime,
        equity: f64,
    ) -> (Option<PositionId>, Option<EngineError>) {
        let rc = self.config.regimes.get(regime);
        let diag = &mut self.state.diagnostics;
        if !rc.enabled {
            diag.disabled_regime_signals += 1;
            return (None, None);
        }
        if self.lifecycle.has_side(side.opposite()) {
            diag.conflict_skips += 1;
            return (None, None);
        }
        if !self.lifecycle.has_capacity() {
            diag.capacity_skips += 1;
            return (None, None);
        }
        let Some(tier) = self.allocator.select_tier(strength).cloned() else {
            diag.rejected_entries += 1;
            return (None, None);
        };

        let weight = self.allocator.weight(&tier.name).unwrap_or(0.0);
        let (risk_fraction, scale_clamp) = self.sizer.risk_fraction(
            rc.risk_per_trade_pct,
            tier.risk_multiplier,
            weight,
            self.allocator.tier_count(),
        );

        let entry = bar.close;
        let atr = self.atr(bar);
        let distances = rc
            .stop_loss
            .distance(entry, atr)
            .zip(rc.take_profit.distance(entry, atr));
        let Some((stop_distance, target_distance)) = distances else {
            self.state.diagnostics.rejected_entries += 1;
            let err = EngineError::InsufficientData {
                required: 2,
                available: self.primary.len(),
            };
            debug!(%err, "no ATR available for stop placement");
            return (None, Some(err));
        };
        let stop_loss = entry - side.sign() * stop_distance;
        let take_profit = entry + side.sign() * target_distance;

        let request = SizingRequest {
            side,
            entry_price: entry,
            stop_loss,
            equity,
            risk_fraction,
            leverage: tier.leverage.min(rc.max_leverage),
            risk_in_use: self.budget.in_use(),
            max_aggregate_risk_pct: rc.max_aggregate_risk_pct,
            max_margin_usage_pct: rc.max_margin_usage_pct,
        };
        let mut decision = match self.sizer.size(&request) {
            Ok(d) => d,
            Err(err) => {
                let diag = &mut self.state.diagnostics;
                match err {
                    EngineError::NoRiskCapacity { .. } => diag.no_risk_capacity += 1,
                    _ => diag.rejected_entries += 1,
                }
                debug!(%err, tier = %tier.name, "entry not sized");
                return (None, Some(err));
            }
        };
        if let Some(clamp) = scale_clamp {
            warn!(tier = %tier.name, ?clamp, "allocation scale clamped");
            decision.adjustments.insert(0, clamp);
        }
        if decision.leverage_rescaled() {
            self.state.diagnostics.liquidation_rescales += 1;
        }

        let position = PositionRequest {
            side,
            entry_price: entry,
            entry_time: bar.timestamp,
            entry_bar: bar_index,
            quantity: decision.quantity,
            leverage: decision.leverage,
            stop_loss,
            take_profit,
            trailing: rc
                .trailing_activation_pct
                .map(|a| TrailingStop::new(side, entry, a, rc.trailing_callback_pct)),
            ladder: ExitLadder::new(
                rc.partial_profit_ladder
                    .iter()
                    .map(|r| LadderRung::new(r.trigger_pct, r.portion))
                    .collect(),
            ),
            risk_reserved: decision.risk_amount,
            regime_at_entry: regime,
            tier: tier.name.clone(),
        };
        match self.lifecycle.open(position) {
            Ok(id) => {
                self.budget.reserve(decision.risk_amount);
                self.state.diagnostics.positions_opened += 1;
                (Some(id), None)
            }
            Err(err) => {
                self.state.diagnostics.rejected_entries += 1;
                debug!(%err, "position request rejected");
                (None, Some(err))
            }
        }
    }
}

/// Run a complete backtest over `bars`.
///
/// Each secondary stream is aligned to the primary by timestamp: on every
/// primary bar the engine receives the latest secondary bar stamped at or
/// before it (bars are assumed to be stamped at their close).
pub fn run_backtest(
    config: &EngineConfig,
    bars: &[Bar],
    secondary_streams: &[Vec<Bar>],
) -> Result<RunResult, BacktestError> {
    let mut engine = Engine::new(config.clone())?;
    info!(
        bars = bars.len(),
        timeframes = secondary_streams.len(),
        config_hash = %engine.config_hash,
        "run started"
    );

    let mut cursors = vec![0usize; secondary_streams.len()];
    let mut aligned = Vec::with_capacity(secondary_streams.len());
    for (bar_index, bar) in bars.iter().enumerate() {
        aligned.clear();
        for (stream, cursor) in secondary_streams.iter().zip(cursors.iter_mut()) {
            while *cursor + 1 < stream.len() && stream[*cursor + 1].timestamp <= bar.timestamp {
                *cursor += 1;
            }
            match stream.get(*cursor) {
                Some(s) if s.timestamp <= bar.timestamp => aligned.push(s.clone()),
                // Stream not started yet: stop feeding later timeframes too,
                // since positions in `secondary` are significant.
                _ => break,
            }
        }
        if let Err(error) = engine.process_bar(bar, &aligned) {
            warn!(bar = bar_index, %error, "run aborted");
            return Err(AbortedRun {
                bar_index,
                error,
                partial: Box::new(engine.snapshot()),
            }
            .into());
        }
    }
    Ok(engine.finish())
}
