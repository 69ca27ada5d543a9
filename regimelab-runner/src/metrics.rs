//! Performance metrics: pure functions that compute run statistics.
//!
//! Every metric is a pure function: equity curve and/or trade log in, scalar out.
//! Zero denominators resolve to 0.0, never NaN; the one infinite value is a
//! profit factor with profits and no losses.

use serde::{Deserialize, Serialize};

use regimelab_core::domain::{equity_values, EquityPoint, TradeRecord};

/// Aggregate performance metrics for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub win_rate: f64,
    #[serde(with = "unbounded")]
    pub profit_factor: f64,
    /// Largest peak-to-trough decline, as a positive fraction of the peak.
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub avg_holding_secs: f64,
    pub avg_bars_held: f64,
    /// Mean realised P&L per trade record.
    pub expectancy: f64,
    pub max_consecutive_losses: usize,
    pub trade_count: usize,
}

impl PerformanceMetrics {
    /// Compute all metrics from a trade log and equity curve.
    ///
    /// Partial exits are separate records and count as trades here.
    pub fn compute(
        trades: &[TradeRecord],
        equity_curve: &[EquityPoint],
        periods_per_year: f64,
    ) -> Self {
        let equity = equity_values(equity_curve);
        let returns = period_returns(&equity);
        Self {
            total_return: total_return(&equity),
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            max_drawdown: max_drawdown(&equity),
            sharpe: sharpe_ratio(&returns, periods_per_year),
            sortino: sortino_ratio(&returns, periods_per_year),
            avg_holding_secs: avg_holding_secs(trades),
            avg_bars_held: avg_bars_held(trades),
            expectancy: expectancy(trades),
            max_consecutive_losses: max_consecutive_losses(trades),
            trade_count: trades.len(),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - first) / first.
pub fn total_return(equity: &[f64]) -> f64 {
    match (equity.first(), equity.last()) {
        (Some(&first), Some(&last)) if equity.len() >= 2 && first > 0.0 => (last - first) / first,
        _ => 0.0,
    }
}

/// Fraction of trade records with positive realised P&L.
pub fn win_rate(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let wins = trades.iter().filter(|t| t.is_winner()).count();
    wins as f64 / trades.len() as f64
}

/// Gross profit / gross loss.
///
/// `+∞` when there are profits and no losses; 0.0 when there is nothing to
/// divide (no trades, or only flat trades).
pub fn profit_factor(trades: &[TradeRecord]) -> f64 {
    let gross_profit: f64 = trades.iter().map(|t| t.realized_pnl).filter(|p| *p > 0.0).sum();
    let gross_loss: f64 = trades
        .iter()
        .map(|t| t.realized_pnl)
        .filter(|p| *p < 0.0)
        .map(f64::abs)
        .sum();
    if gross_loss == 0.0 {
        if gross_profit > 0.0 {
            return f64::INFINITY;
        }
        return 0.0;
    }
    gross_profit / gross_loss
}

/// Maximum of `(running_peak - equity) / running_peak`.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &value in equity {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}

/// Mean period return over its sample standard deviation, annualised.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    let sd = std_dev(returns);
    if sd == 0.0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    mean_f64(returns) / sd * periods_per_year.sqrt()
}

/// Like Sharpe, but only downside periods count towards the deviation.
pub fn sortino_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    let dd = downside_deviation(returns);
    if dd == 0.0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    mean_f64(returns) / dd * periods_per_year.sqrt()
}

/// Mean wall-clock time between entry and exit, in seconds.
pub fn avg_holding_secs(trades: &[TradeRecord]) -> f64 {
    let secs: Vec<f64> = trades
        .iter()
        .map(|t| (t.exit_time - t.entry_time).num_seconds() as f64)
        .collect();
    mean_f64(&secs)
}

pub fn avg_bars_held(trades: &[TradeRecord]) -> f64 {
    let bars: Vec<f64> = trades.iter().map(|t| t.bars_held as f64).collect();
    mean_f64(&bars)
}

/// Mean realised P&L per trade record.
pub fn expectancy(trades: &[TradeRecord]) -> f64 {
    let pnl: Vec<f64> = trades.iter().map(|t| t.realized_pnl).collect();
    mean_f64(&pnl)
}

/// Longest run of non-winning records.
pub fn max_consecutive_losses(trades: &[TradeRecord]) -> usize {
    let mut max_streak = 0;
    let mut current = 0;
    for trade in trades {
        if trade.is_winner() {
            current = 0;
        } else {
            current += 1;
            max_streak = max_streak.max(current);
        }
    }
    max_streak
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Bar-over-bar returns of an equity curve. A non-positive base yields 0.0.
pub fn period_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    let variance = squares / (values.len() - 1) as f64;
    variance.sqrt()
}

fn downside_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| v.min(0.0).powi(2)).sum();
    (sum_sq / values.len() as f64).sqrt()
}

/// JSON has no infinity: `+∞` is written as `null` and read back as `+∞`.
mod unbounded {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use regimelab_core::domain::{ExitReason, PositionId, PositionSide, TradeId};
    use regimelab_core::regime::Regime;

    fn make_trade(net_pnl: f64, bars_held: usize) -> TradeRecord {
        let entry = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        TradeRecord {
            id: TradeId(1),
            position_id: PositionId(1),
            side: PositionSide::Long,
            tier: "moderate".into(),
            regime_at_entry: Regime::Ranging,
            entry_time: entry,
            entry_price: 100.0,
            exit_time: entry + Duration::hours(bars_held as i64),
            exit_price: 100.0 + net_pnl / 10.0,
            exit_reason: ExitReason::TakeProfit,
            is_partial: false,
            quantity: 10.0,
            leverage: 1.0,
            realized_pnl: net_pnl,
            pnl_pct: net_pnl / 1_000.0,
            bars_held,
            mae: 0.0,
            mfe: 0.0,
        }
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: t0 + Duration::hours(i as i64),
                equity,
            })
            .collect()
    }

    #[test]
    fn total_return_basic() {
        assert!((total_return(&[100.0, 110.0]) - 0.1).abs() < 1e-12);
        assert_eq!(total_return(&[100.0]), 0.0);
        assert_eq!(total_return(&[]), 0.0);
    }

    #[test]
    fn drawdown_is_a_positive_fraction() {
        let eq = [100.0, 120.0, 90.0, 130.0, 117.0];
        assert!((max_drawdown(&eq) - 0.25).abs() < 1e-12);
        assert_eq!(max_drawdown(&[100.0, 101.0, 102.0]), 0.0);
    }

    #[test]
    fn profit_factor_sentinels() {
        assert_eq!(profit_factor(&[]), 0.0);
        assert_eq!(profit_factor(&[make_trade(0.0, 1)]), 0.0);
        assert_eq!(profit_factor(&[make_trade(50.0, 1)]), f64::INFINITY);
        let pf = profit_factor(&[make_trade(300.0, 1), make_trade(-100.0, 1)]);
        assert!((pf - 3.0).abs() < 1e-12);
    }

    #[test]
    fn win_rate_counts_every_record() {
        let trades = [
            make_trade(10.0, 1),
            make_trade(-5.0, 1),
            make_trade(0.0, 1),
            make_trade(3.0, 1),
        ];
        assert!((win_rate(&trades) - 0.5).abs() < 1e-12);
        assert_eq!(win_rate(&[]), 0.0);
    }

    #[test]
    fn flat_equity_has_zero_ratios() {
        let returns = period_returns(&[100.0; 10]);
        assert_eq!(sharpe_ratio(&returns, 252.0), 0.0);
        assert_eq!(sortino_ratio(&returns, 252.0), 0.0);
    }

    #[test]
    fn sharpe_is_annualised() {
        let returns = [0.01, -0.005, 0.02, 0.0];
        let raw = mean_f64(&returns) / std_dev(&returns);
        assert!((sharpe_ratio(&returns, 1.0) - raw).abs() < 1e-12);
        assert!((sharpe_ratio(&returns, 252.0) - raw * 252.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn sortino_ignores_upside_volatility() {
        let calm = [0.01, 0.01, -0.01, 0.01];
        let wild_up = [0.05, 0.00, -0.01, 0.04];
        assert!(sortino_ratio(&wild_up, 1.0) > sortino_ratio(&calm, 1.0));
        assert_eq!(sortino_ratio(&[0.01, 0.02], 1.0), 0.0);
    }

    #[test]
    fn losing_streaks() {
        let trades: Vec<_> = [1.0, -1.0, -1.0, 0.0, 2.0, -1.0]
            .iter()
            .map(|p| make_trade(*p, 1))
            .collect();
        assert_eq!(max_consecutive_losses(&trades), 3);
        assert_eq!(max_consecutive_losses(&[]), 0);
    }

    #[test]
    fn holding_time_and_expectancy() {
        let trades = [make_trade(100.0, 2), make_trade(-40.0, 4)];
        assert!((avg_holding_secs(&trades) - 3.0 * 3600.0).abs() < 1e-9);
        assert!((avg_bars_held(&trades) - 3.0).abs() < 1e-12);
        assert!((expectancy(&trades) - 30.0).abs() < 1e-12);
    }

    #[test]
    fn compute_on_empty_inputs_is_all_zero() {
        let m = PerformanceMetrics::compute(&[], &[], 252.0);
        assert_eq!(m.trade_count, 0);
        for v in [
            m.total_return,
            m.win_rate,
            m.profit_factor,
            m.max_drawdown,
            m.sharpe,
            m.sortino,
            m.expectancy,
        ] {
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn compute_wires_every_field() {
        let trades = [make_trade(200.0, 5), make_trade(-100.0, 3)];
        let equity = curve(&[10_000.0, 10_200.0, 10_100.0]);
        let m = PerformanceMetrics::compute(&trades, &equity, 252.0);
        assert_eq!(m.trade_count, 2);
        assert!((m.total_return - 0.01).abs() < 1e-12);
        assert!((m.profit_factor - 2.0).abs() < 1e-12);
        assert!(m.max_drawdown > 0.0);
        assert_eq!(m.max_consecutive_losses, 1);
    }

    #[test]
    fn infinite_profit_factor_survives_json() {
        let m = PerformanceMetrics::compute(&[make_trade(10.0, 1)], &curve(&[100.0, 110.0]), 252.0);
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"profit_factor\":null"));
        let back: PerformanceMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.profit_factor, f64::INFINITY);
    }
}
