//! Engine configuration.
//!
//! Every component receives its slice of an immutable `EngineConfig` at
//! construction. Values are deserialised with serde defaults and then checked
//! by [`EngineConfig::validate`]; nothing is read from globals.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ConfigError;
use crate::fingerprint::ConfigHash;
use crate::regime::{Regime, RegimeThresholds};

// ── Stop / target rules ─────────────────────────────────────────────

/// How a stop-loss or take-profit distance is derived from the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopRule {
    /// Fixed fraction of the entry price.
    Percent { pct: f64 },
    /// Multiple of the current ATR.
    AtrMultiple { multiple: f64 },
}

impl StopRule {
    /// Distance in price units. `None` when the rule needs an ATR and none is known.
    pub fn distance(&self, entry_price: f64, atr: Option<f64>) -> Option<f64> {
        match self {
            Self::Percent { pct } => Some(entry_price * pct),
            Self::AtrMultiple { multiple } => atr.map(|a| a * multiple),
        }
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        let value = match self {
            Self::Percent { pct } => *pct,
            Self::AtrMultiple { multiple } => *multiple,
        };
        if !(value.is_finite() && value > 0.0) {
            return Err(ConfigError::invalid(field, "must be positive"));
        }
        Ok(())
    }
}

// ── Signal generators ───────────────────────────────────────────────

/// Sub-signal generator selection. Indicator keys refer to the bar's
/// indicator snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeneratorKind {
    OscillatorThreshold {
        key: String,
        oversold: f64,
        overbought: f64,
    },
    MovingAverageCross {
        fast_key: String,
        slow_key: String,
        decay_bars: usize,
    },
    BandBreakout {
        upper_key: String,
        middle_key: String,
        lower_key: String,
    },
    MomentumBreakout {
        lookback: usize,
        key: String,
        threshold: f64,
    },
}

/// A generator plus its weight in the composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub weight: f64,
    #[serde(flatten)]
    pub kind: GeneratorKind,
}

impl GeneratorConfig {
    pub fn new(weight: f64, kind: GeneratorKind) -> Self {
        Self { weight, kind }
    }

    pub fn rsi(weight: f64) -> Self {
        Self::new(
            weight,
            GeneratorKind::OscillatorThreshold {
                key: "rsi".into(),
                oversold: 30.0,
                overbought: 70.0,
            },
        )
    }

    pub fn ema_cross(weight: f64) -> Self {
        Self::new(
            weight,
            GeneratorKind::MovingAverageCross {
                fast_key: "ema_fast".into(),
                slow_key: "ema_slow".into(),
                decay_bars: 3,
            },
        )
    }

    pub fn bollinger(weight: f64) -> Self {
        Self::new(
            weight,
            GeneratorKind::BandBreakout {
                upper_key: "bb_upper".into(),
                middle_key: "bb_middle".into(),
                lower_key: "bb_lower".into(),
            },
        )
    }

    pub fn momentum(weight: f64) -> Self {
        Self::new(
            weight,
            GeneratorKind::MomentumBreakout {
                lookback: 20,
                key: "momentum".into(),
                threshold: 0.05,
            },
        )
    }

    /// Bars of history this generator needs, including the current one.
    pub fn history_needed(&self) -> usize {
        match &self.kind {
            GeneratorKind::OscillatorThreshold { .. } => 1,
            GeneratorKind::MovingAverageCross { decay_bars, .. } => decay_bars + 1,
            GeneratorKind::BandBreakout { .. } => 1,
            GeneratorKind::MomentumBreakout { lookback, .. } => lookback + 1,
        }
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if !(self.weight.is_finite() && self.weight >= 0.0) {
            return Err(ConfigError::invalid(format!("{field}.weight"), "must be >= 0"));
        }
        match &self.kind {
            GeneratorKind::OscillatorThreshold {
                oversold,
                overbought,
                ..
            } => {
                if !(0.0 < *oversold && oversold < overbought && *overbought < 100.0) {
                    return Err(ConfigError::invalid(
                        field,
                        "need 0 < oversold < overbought < 100",
                    ));
                }
            }
            GeneratorKind::MovingAverageCross { decay_bars, .. } => {
                if *decay_bars == 0 {
                    return Err(ConfigError::invalid(format!("{field}.decay_bars"), "must be >= 1"));
                }
            }
            GeneratorKind::BandBreakout { .. } => {}
            GeneratorKind::MomentumBreakout {
                lookback,
                threshold,
                ..
            } => {
                if *lookback == 0 {
                    return Err(ConfigError::invalid(format!("{field}.lookback"), "must be >= 1"));
                }
                if !(threshold.is_finite() && *threshold > 0.0) {
                    return Err(ConfigError::invalid(
                        format!("{field}.threshold"),
                        "must be positive",
                    ));
                }
            }
        }
        Ok(())
    }
}

// ── Per-regime trading parameters ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderRungConfig {
    pub trigger_pct: f64,
    pub portion: f64,
}

/// Trading parameters that apply while a given regime is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Regimes with trading disabled still manage open positions.
    pub enabled: bool,
    pub min_signal_strength: f64,
    pub timeframe_alignment_threshold: f64,
    pub stop_loss: StopRule,
    pub take_profit: StopRule,
    pub risk_per_trade_pct: f64,
    pub max_leverage: f64,
    /// `None` disables the trailing stop.
    pub trailing_activation_pct: Option<f64>,
    pub trailing_callback_pct: f64,
    pub partial_profit_ladder: Vec<LadderRungConfig>,
    pub max_aggregate_risk_pct: f64,
    pub max_margin_usage_pct: f64,
    pub generators: Vec<GeneratorConfig>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_signal_strength: 0.3,
            timeframe_alignment_threshold: 0.6,
            stop_loss: StopRule::Percent { pct: 0.02 },
            take_profit: StopRule::Percent { pct: 0.04 },
            risk_per_trade_pct: 0.01,
            max_leverage: 3.0,
            trailing_activation_pct: Some(0.02),
            trailing_callback_pct: 0.01,
            partial_profit_ladder: Vec::new(),
            max_aggregate_risk_pct: 0.06,
            max_margin_usage_pct: 0.5,
            generators: vec![
                GeneratorConfig::rsi(1.0),
                GeneratorConfig::ema_cross(1.0),
                GeneratorConfig::bollinger(1.0),
                GeneratorConfig::momentum(1.0),
            ],
        }
    }
}

impl RegimeConfig {
    /// Defaults tuned per regime: trend-following weights and looser
    /// confirmation in trends, stricter confirmation and smaller risk in
    /// ranging or volatile markets.
    pub fn default_for(regime: Regime) -> Self {
        let base = Self::default();
        match regime {
            Regime::TrendingUp | Regime::TrendingDown => Self {
                timeframe_alignment_threshold: 0.5,
                stop_loss: StopRule::AtrMultiple { multiple: 2.0 },
                take_profit: StopRule::AtrMultiple { multiple: 4.0 },
                risk_per_trade_pct: 0.015,
                partial_profit_ladder: vec![
                    LadderRungConfig {
                        trigger_pct: 0.03,
                        portion: 0.3,
                    },
                    LadderRungConfig {
                        trigger_pct: 0.06,
                        portion: 0.3,
                    },
                ],
                generators: vec![
                    GeneratorConfig::rsi(0.5),
                    GeneratorConfig::ema_cross(2.0),
                    GeneratorConfig::bollinger(1.0),
                    GeneratorConfig::momentum(2.0),
                ],
                ..base
            },
            Regime::Ranging => Self {
                timeframe_alignment_threshold: 0.7,
                min_signal_strength: 0.4,
                trailing_activation_pct: None,
                generators: vec![
                    GeneratorConfig::rsi(2.0),
                    GeneratorConfig::ema_cross(0.5),
                    GeneratorConfig::bollinger(1.0),
                    GeneratorConfig::momentum(0.5),
                ],
                ..base
            },
            Regime::Volatile => Self {
                timeframe_alignment_threshold: 0.7,
                min_signal_strength: 0.5,
                risk_per_trade_pct: 0.005,
                max_leverage: 2.0,
                stop_loss: StopRule::AtrMultiple { multiple: 2.5 },
                take_profit: StopRule::AtrMultiple { multiple: 3.0 },
                ..base
            },
            Regime::Quiet => Self {
                min_signal_strength: 0.4,
                stop_loss: StopRule::Percent { pct: 0.01 },
                take_profit: StopRule::Percent { pct: 0.02 },
                ..base
            },
        }
    }

    pub fn validate(&self, prefix: &str, portfolio_ceiling: f64) -> Result<(), ConfigError> {
        let f = |name: &str| format!("{prefix}.{name}");
        let unit = |name: &str, v: f64| -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::invalid(f(name), "must be in [0, 1]"))
            }
        };
        unit("min_signal_strength", self.min_signal_strength)?;
        unit("timeframe_alignment_threshold", self.timeframe_alignment_threshold)?;
        self.stop_loss.validate(&f("stop_loss"))?;
        self.take_profit.validate(&f("take_profit"))?;
        if !(self.risk_per_trade_pct > 0.0 && self.risk_per_trade_pct <= 1.0) {
            return Err(ConfigError::invalid(f("risk_per_trade_pct"), "must be in (0, 1]"));
        }
        if !(self.max_leverage.is_finite() && self.max_leverage >= 1.0) {
            return Err(ConfigError::invalid(f("max_leverage"), "must be >= 1"));
        }
        if let Some(pct) = self.trailing_activation_pct {
            if !(pct.is_finite() && pct >= 0.0) {
                return Err(ConfigError::invalid(f("trailing_activation_pct"), "must be >= 0"));
            }
            if !(self.trailing_callback_pct > 0.0 && self.trailing_callback_pct < 1.0) {
                return Err(ConfigError::invalid(f("trailing_callback_pct"), "must be in (0, 1)"));
            }
        }
        let mut total = 0.0;
        for rung in &self.partial_profit_ladder {
            if !(rung.trigger_pct > 0.0 && rung.portion > 0.0 && rung.portion <= 1.0) {
                return Err(ConfigError::invalid(
                    f("partial_profit_ladder"),
                    "rungs need trigger_pct > 0 and portion in (0, 1]",
                ));
            }
            total += rung.portion;
        }
        if total > 1.0 + 1e-9 {
            return Err(ConfigError::invalid(
                f("partial_profit_ladder"),
                format!("portions sum to {total} (> 1.0)"),
            ));
        }
        let ceiling_ok = self.max_aggregate_risk_pct > 0.0
            && self.max_aggregate_risk_pct <= portfolio_ceiling;
        if !ceiling_ok {
            return Err(ConfigError::invalid(
                f("max_aggregate_risk_pct"),
                format!("must be in (0, {portfolio_ceiling}]"),
            ));
        }
        if !(self.max_margin_usage_pct > 0.0 && self.max_margin_usage_pct <= 1.0) {
            return Err(ConfigError::invalid(f("max_margin_usage_pct"), "must be in (0, 1]"));
        }
        for (i, g) in self.generators.iter().enumerate() {
            g.validate(&f(&format!("generators[{i}]")))?;
        }
        if self.enabled && self.generators.iter().all(|g| g.weight == 0.0) {
            return Err(ConfigError::invalid(f("generators"), "need at least one positive weight"));
        }
        Ok(())
    }
}

/// One `RegimeConfig` per regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfigs {
    pub trending_up: RegimeConfig,
    pub trending_down: RegimeConfig,
    pub ranging: RegimeConfig,
    pub volatile: RegimeConfig,
    pub quiet: RegimeConfig,
}

impl Default for RegimeConfigs {
    fn default() -> Self {
        Self {
            trending_up: RegimeConfig::default_for(Regime::TrendingUp),
            trending_down: RegimeConfig::default_for(Regime::TrendingDown),
            ranging: RegimeConfig::default_for(Regime::Ranging),
            volatile: RegimeConfig::default_for(Regime::Volatile),
            quiet: RegimeConfig::default_for(Regime::Quiet),
        }
    }
}

impl RegimeConfigs {
    /// Same parameters for every regime.
    pub fn uniform(config: RegimeConfig) -> Self {
        Self {
            trending_up: config.clone(),
            trending_down: config.clone(),
            ranging: config.clone(),
            volatile: config.clone(),
            quiet: config,
        }
    }

    pub fn get(&self, regime: Regime) -> &RegimeConfig {
        match regime {
            Regime::TrendingUp => &self.trending_up,
            Regime::TrendingDown => &self.trending_down,
            Regime::Ranging => &self.ranging,
            Regime::Volatile => &self.volatile,
            Regime::Quiet => &self.quiet,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Regime, &RegimeConfig)> {
        Regime::ALL.into_iter().map(move |r| (r, self.get(r)))
    }
}

// ── Risk tiers and allocation ───────────────────────────────────────

/// A named risk-appetite bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub risk_multiplier: f64,
    pub leverage: f64,
    /// Minimum signal strength for this tier to be selected.
    #[serde(default)]
    pub min_signal_strength: f64,
    /// Initial capital weight; `None` means an equal share.
    #[serde(default)]
    pub weight: Option<f64>,
}

impl TierConfig {
    pub fn new(
        name: impl Into<String>,
        risk_multiplier: f64,
        leverage: f64,
        min_signal_strength: f64,
    ) -> Self {
        Self {
            name: name.into(),
            risk_multiplier,
            leverage,
            min_signal_strength,
            weight: None,
        }
    }

    pub fn default_tiers() -> Vec<Self> {
        vec![
            Self::new("conservative", 0.5, 1.0, 0.0),
            Self::new("moderate", 1.0, 2.0, 0.5),
            Self::new("aggressive", 1.5, 3.0, 0.75),
        ]
    }
}

/// When the allocator re-weights tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    EveryBars(usize),
    EveryTrades(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Blend factor: 1.0 jumps straight to the performance weights.
    pub alpha: f64,
    pub cadence: Cadence,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            cadence: Cadence::EveryTrades(10),
        }
    }
}

// ── Sizing ──────────────────────────────────────────────────────────

/// What to do when the stop sits too close to the liquidation price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LiquidationPolicy {
    Reject,
    #[default]
    Rescale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub maintenance_margin_rate: f64,
    /// Required gap between stop and liquidation price, as a fraction of entry.
    pub liquidation_buffer_pct: f64,
    pub liquidation_policy: LiquidationPolicy,
    pub min_allocation_scale: f64,
    pub max_allocation_scale: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            maintenance_margin_rate: 0.005,
            liquidation_buffer_pct: 0.005,
            liquidation_policy: LiquidationPolicy::Rescale,
            min_allocation_scale: 0.25,
            max_allocation_scale: 2.0,
        }
    }
}

// ── Portfolio & lifecycle ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub initial_equity: f64,
    /// Hard ceiling on summed reservations, as a fraction of equity.
    pub max_aggregate_risk_pct: f64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_equity: 10_000.0,
            max_aggregate_risk_pct: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Close on an opposing signal.
    pub reversal_exit: bool,
    pub max_holding_bars: Option<usize>,
    pub max_open_positions: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reversal_exit: true,
            max_holding_bars: None,
            max_open_positions: 1,
        }
    }
}

/// A secondary timeframe and its weight in the multi-timeframe composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeConfig {
    pub name: String,
    pub weight: f64,
}

// ── Top level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub portfolio: PortfolioConfig,
    pub classifier: RegimeThresholds,
    pub regimes: RegimeConfigs,
    pub tiers: Vec<TierConfig>,
    pub allocator: AllocatorConfig,
    pub sizing: SizingConfig,
    pub lifecycle: LifecycleConfig,
    /// Weight of the primary timeframe in the composite.
    pub primary_weight: f64,
    /// Secondary timeframes, in the order their bars are supplied.
    pub timeframes: Vec<TimeframeConfig>,
    /// Indicator key holding the ATR value.
    pub atr_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            portfolio: PortfolioConfig::default(),
            classifier: RegimeThresholds::default(),
            regimes: RegimeConfigs::default(),
            tiers: TierConfig::default_tiers(),
            allocator: AllocatorConfig::default(),
            sizing: SizingConfig::default(),
            lifecycle: LifecycleConfig::default(),
            primary_weight: 1.0,
            timeframes: Vec::new(),
            atr_key: "atr".into(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.portfolio;
        if !(p.initial_equity.is_finite() && p.initial_equity > 0.0) {
            return Err(ConfigError::invalid("portfolio.initial_equity", "must be positive"));
        }
        if !(p.max_aggregate_risk_pct > 0.0 && p.max_aggregate_risk_pct <= 1.0) {
            return Err(ConfigError::invalid(
                "portfolio.max_aggregate_risk_pct",
                "must be in (0, 1]",
            ));
        }

        self.classifier.validate()?;
        for (regime, cfg) in self.regimes.iter() {
            cfg.validate(&format!("regimes.{regime}"), p.max_aggregate_risk_pct)?;
        }

        if self.tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        let mut seen = HashSet::new();
        for tier in &self.tiers {
            if !seen.insert(tier.name.as_str()) {
                return Err(ConfigError::DuplicateTier(tier.name.clone()));
            }
            let field = |n: &str| format!("tiers.{}.{n}", tier.name);
            if !(tier.risk_multiplier.is_finite() && tier.risk_multiplier > 0.0) {
                return Err(ConfigError::invalid(field("risk_multiplier"), "must be positive"));
            }
            if !(tier.leverage.is_finite() && tier.leverage >= 1.0) {
                return Err(ConfigError::invalid(field("leverage"), "must be >= 1"));
            }
            if !(0.0..=1.0).contains(&tier.min_signal_strength) {
                return Err(ConfigError::invalid(field("min_signal_strength"), "must be in [0, 1]"));
            }
            if let Some(w) = tier.weight {
                if !(w.is_finite() && w >= 0.0) {
                    return Err(ConfigError::invalid(field("weight"), "must be >= 0"));
                }
            }
        }
        let explicit: f64 = self.tiers.iter().filter_map(|t| t.weight).sum();
        let implicit = self.tiers.iter().filter(|t| t.weight.is_none()).count();
        if explicit <= 0.0 && implicit == 0 {
            return Err(ConfigError::invalid("tiers", "weights sum to zero"));
        }

        if !(0.0..=1.0).contains(&self.allocator.alpha) {
            return Err(ConfigError::invalid("allocator.alpha", "must be in [0, 1]"));
        }
        match self.allocator.cadence {
            Cadence::EveryBars(0) | Cadence::EveryTrades(0) => {
                return Err(ConfigError::invalid("allocator.cadence", "must be >= 1"));
            }
            _ => {}
        }

        let s = &self.sizing;
        if !(0.0..1.0).contains(&s.maintenance_margin_rate) {
            return Err(ConfigError::invalid("sizing.maintenance_margin_rate", "must be in [0, 1)"));
        }
        if !(s.liquidation_buffer_pct.is_finite() && s.liquidation_buffer_pct >= 0.0) {
            return Err(ConfigError::invalid("sizing.liquidation_buffer_pct", "must be >= 0"));
        }
        if !(s.min_allocation_scale > 0.0 && s.min_allocation_scale <= s.max_allocation_scale) {
            return Err(ConfigError::invalid(
                "sizing.min_allocation_scale",
                "need 0 < min_allocation_scale <= max_allocation_scale",
            ));
        }

        if self.lifecycle.max_open_positions == 0 {
            return Err(ConfigError::invalid("lifecycle.max_open_positions", "must be >= 1"));
        }
        if self.lifecycle.max_holding_bars == Some(0) {
            return Err(ConfigError::invalid("lifecycle.max_holding_bars", "must be >= 1"));
        }

        if !(self.primary_weight.is_finite() && self.primary_weight > 0.0) {
            return Err(ConfigError::invalid("primary_weight", "must be positive"));
        }
        for tf in &self.timeframes {
            if !(tf.weight.is_finite() && tf.weight > 0.0) {
                return Err(ConfigError::invalid(
                    format!("timeframes.{}.weight", tf.name),
                    "must be positive",
                ));
            }
        }
        Ok(())
    }

    /// Bars the engine must retain: the classifier window plus whatever
    /// the most demanding generator looks back over.
    pub fn history_len(&self) -> usize {
        let generators = self
            .regimes
            .iter()
            .flat_map(|(_, c)| c.generators.iter())
            .map(GeneratorConfig::history_needed)
            .max()
            .unwrap_or(1);
        self.classifier.window.max(generators).max(2)
    }

    /// Canonical hash of the full configuration.
    pub fn config_hash(&self) -> Result<ConfigHash, ConfigError> {
        ConfigHash::of(self)
    }
}
