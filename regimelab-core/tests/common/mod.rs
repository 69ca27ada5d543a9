//! Deterministic bar fixtures shared by the integration suites.
//!
//! Prices follow a sine wave (optionally on a drift) so every regime rule and
//! every generator gets exercised. Indicators are computed here, upstream of
//! the engine, the way a data loader would.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use regimelab_core::config::{
    EngineConfig, GeneratorConfig, RegimeConfig, RegimeConfigs, StopRule, TierConfig,
};
use regimelab_core::domain::{Bar, IndicatorSnapshot};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn ts(i: usize) -> DateTime<Utc> {
    t0() + Duration::hours(i as i64)
}

/// Raw OHLCV closes on `100 + amplitude·sin(0.1·i) + drift·i`.
pub fn sine_prices(n: usize, amplitude: f64, drift: f64) -> Vec<(f64, f64, f64, f64)> {
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * amplitude + drift * i as f64;
            let open = close - 0.3;
            (open, close.max(open) + 1.0, close.min(open) - 1.0, close)
        })
        .collect()
}

/// Sine-wave bars with `rsi`, `ema_fast`, `ema_slow`, `bb_*`, `momentum`
/// and `atr` indicators. Early values are NaN until warmed up.
pub fn sine_bars(n: usize, amplitude: f64, drift: f64) -> Vec<Bar> {
    bars_with_indicators(&sine_prices(n, amplitude, drift))
}

/// Same construction, shifted in time and sampled every `step` primary
/// bars, for use as a coarser secondary timeframe.
pub fn sine_bars_every(n: usize, step: usize, amplitude: f64, drift: f64) -> Vec<Bar> {
    let prices: Vec<_> = sine_prices(n * step, amplitude, drift)
        .into_iter()
        .step_by(step)
        .collect();
    let mut bars = bars_with_indicators(&prices);
    for (i, bar) in bars.iter_mut().enumerate() {
        bar.timestamp = ts(i * step);
    }
    bars
}

fn bars_with_indicators(prices: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    let closes: Vec<f64> = prices.iter().map(|p| p.3).collect();
    let ema_fast = ema(&closes, 5);
    let ema_slow = ema(&closes, 20);
    let rsi = rsi(&closes, 14);

    let mut prev_close: Option<f64> = None;
    let mut trs = Vec::with_capacity(prices.len());
    prices
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| {
            let bar = Bar::new(ts(i), o, h, l, c, 1_000.0);
            trs.push(bar.true_range(prev_close));
            prev_close = Some(c);

            let mut snap = IndicatorSnapshot::new()
                .with("ema_fast", ema_fast[i])
                .with("ema_slow", ema_slow[i])
                .with("rsi", rsi[i]);
            if i >= 19 {
                let window = &closes[i - 19..=i];
                let mean = window.iter().sum::<f64>() / 20.0;
                let sd = (window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 20.0).sqrt();
                snap.insert("bb_upper", mean + 2.0 * sd);
                snap.insert("bb_middle", mean);
                snap.insert("bb_lower", mean - 2.0 * sd);
            }
            if i >= 10 {
                snap.insert("momentum", c / closes[i - 10] - 1.0);
            }
            if i >= 13 {
                snap.insert("atr", trs[i - 13..=i].iter().sum::<f64>() / 14.0);
            }
            bar.with_indicators(snap)
        })
        .collect()
}

fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for (i, &v) in values.iter().enumerate() {
        if i + 1 < period {
            out.push(f64::NAN);
            continue;
        }
        let next = match prev {
            None => values[i + 1 - period..=i].iter().sum::<f64>() / period as f64,
            Some(p) => p + k * (v - p),
        };
        prev = Some(next);
        out.push(next);
    }
    out
}

fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = (change.max(0.0), (-change).max(0.0));
        if i <= period {
            avg_gain += gain / period as f64;
            avg_loss += loss / period as f64;
            if i < period {
                continue;
            }
        } else {
            avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
            avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        }
        out[i] = if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
    }
    out
}

/// Config that trades the RSI swings of a sine wave in every regime.
pub fn rsi_config() -> EngineConfig {
    let regime = RegimeConfig {
        min_signal_strength: 0.05,
        timeframe_alignment_threshold: 0.0,
        stop_loss: StopRule::AtrMultiple { multiple: 2.0 },
        take_profit: StopRule::AtrMultiple { multiple: 4.0 },
        generators: vec![GeneratorConfig::rsi(1.0)],
        ..RegimeConfig::default()
    };
    let mut config = EngineConfig {
        regimes: RegimeConfigs::uniform(regime),
        tiers: TierConfig::default_tiers(),
        ..EngineConfig::default()
    };
    config.allocator.cadence = regimelab_core::config::Cadence::EveryTrades(4);
    config
}
