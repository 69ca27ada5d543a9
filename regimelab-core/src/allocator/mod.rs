//! Portfolio risk allocator.
//!
//! Tracks per-tier trade statistics and periodically re-weights capital
//! across tiers:
//!
//! ```text
//! score_i   = win_rate_i × max(cum_pnl_i, 0)              (round stats)
//! blended_i = α × score_i / Σscore + (1 − α) × w_i / mass   (traded tiers)
//! w_i'      = blended_i × mass
//! ```
//!
//! where `mass` is the weight the traded tiers held before the round.
//! Untraded tiers keep their weight; a round with zero total score changes
//! nothing. Weights are renormalised to sum to 1.0 afterwards.

pub mod budget;

pub use budget::RiskBudget;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use crate::config::{AllocatorConfig, Cadence, TierConfig};
use crate::error::ConfigError;

/// Running outcome counters for one tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub trade_count: usize,
    pub win_count: usize,
    pub cumulative_pnl: f64,
}

impl TierStats {
    pub fn record(&mut self, pnl: f64) {
        self.trade_count += 1;
        if pnl > 0.0 {
            self.win_count += 1;
        }
        self.cumulative_pnl += pnl;
    }

    pub fn win_rate(&self) -> f64 {
        if self.trade_count == 0 {
            0.0
        } else {
            self.win_count as f64 / self.trade_count as f64
        }
    }

    pub fn score(&self) -> f64 {
        self.win_rate() * self.cumulative_pnl.max(0.0)
    }
}

/// Weights after one reallocation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSnapshot {
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
    pub weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
struct TierState {
    config: TierConfig,
    weight: f64,
    round: TierStats,
    lifetime: TierStats,
}

#[derive(Debug, Clone)]
pub struct PortfolioRiskAllocator {
    tiers: Vec<TierState>,
    alpha: f64,
    cadence: Cadence,
    bars_since: usize,
    trades_since: usize,
    history: Vec<AllocationSnapshot>,
}

impl PortfolioRiskAllocator {
    pub fn new(tiers: &[TierConfig], config: &AllocatorConfig) -> Result<Self, ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        let mut seen = HashSet::new();
        for t in tiers {
            if !seen.insert(t.name.as_str()) {
                return Err(ConfigError::DuplicateTier(t.name.clone()));
            }
        }

        let equal = 1.0 / tiers.len() as f64;
        let raw: Vec<f64> = tiers.iter().map(|t| t.weight.unwrap_or(equal)).collect();
        let total: f64 = raw.iter().sum();
        if !(total > 0.0) {
            return Err(ConfigError::invalid("tiers", "weights sum to zero"));
        }

        Ok(Self {
            tiers: tiers
                .iter()
                .zip(raw)
                .map(|(t, w)| TierState {
                    config: t.clone(),
                    weight: w / total,
                    round: TierStats::default(),
                    lifetime: TierStats::default(),
                })
                .collect(),
            alpha: config.alpha,
            cadence: config.cadence,
            bars_since: 0,
            trades_since: 0,
            history: Vec::new(),
        })
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// The most aggressive tier (highest strength floor) the signal
    /// qualifies for. Equal floors resolve to the first declared.
    pub fn select_tier(&self, strength: f64) -> Option<&TierConfig> {
        let mut best: Option<&TierConfig> = None;
        for t in &self.tiers {
            if t.config.min_signal_strength > strength {
                continue;
            }
            match best {
                Some(b) if b.min_signal_strength >= t.config.min_signal_strength => {}
                _ => best = Some(&t.config),
            }
        }
        best
    }

    pub fn weight(&self, tier: &str) -> Option<f64> {
        self.tiers.iter().find(|t| t.config.name == tier).map(|t| t.weight)
    }

    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.tiers
            .iter()
            .map(|t| (t.config.name.clone(), t.weight))
            .collect()
    }

    /// Lifetime statistics per tier, for reporting.
    pub fn lifetime_stats(&self) -> BTreeMap<String, TierStats> {
        self.tiers
            .iter()
            .map(|t| (t.config.name.clone(), t.lifetime.clone()))
            .collect()
    }

    pub fn round_stats(&self, tier: &str) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.config.name == tier).map(|t| &t.round)
    }

    pub fn history(&self) -> &[AllocationSnapshot] {
        &self.history
    }

    /// Record one realised trade (full or partial) for `tier`.
    pub fn record_trade(&mut self, tier: &str, pnl: f64) {
        if let Some(t) = self.tiers.iter_mut().find(|t| t.config.name == tier) {
            t.round.record(pnl);
            t.lifetime.record(pnl);
            self.trades_since += 1;
        }
    }

    /// Advance the bar counter and reallocate if the cadence is due.
    /// Returns true when a reallocation round ran.
    pub fn on_bar_end(&mut self, bar_index: usize, timestamp: DateTime<Utc>) -> bool {
        self.bars_since += 1;
        let due = match self.cadence {
            Cadence::EveryBars(n) => self.bars_since >= n,
            Cadence::EveryTrades(m) => self.trades_since >= m,
        };
        if due {
            self.reallocate(bar_index, timestamp);
        }
        due
    }

    /// Run one reallocation round immediately.
    pub fn reallocate(&mut self, bar_index: usize, timestamp: DateTime<Utc>) {
        self.bars_since = 0;
        self.trades_since = 0;

        let traded: Vec<usize> = (0..self.tiers.len())
            .filter(|&i| self.tiers[i].round.trade_count > 0)
            .collect();
        let total_score: f64 = traded.iter().map(|&i| self.tiers[i].round.score()).sum();
        let mass: f64 = traded.iter().map(|&i| self.tiers[i].weight).sum();

        if total_score > 0.0 && mass > 0.0 {
            for &i in &traded {
                let t = &mut self.tiers[i];
                let share = t.round.score() / total_score;
                let blended = self.alpha * share + (1.0 - self.alpha) * t.weight / mass;
                t.weight = blended * mass;
            }
            let sum: f64 = self.tiers.iter().map(|t| t.weight).sum();
            if sum > 0.0 {
                for t in &mut self.tiers {
                    t.weight /= sum;
                }
            }
            let weights = self.weights();
            info!(bar = bar_index, ?weights, "tier weights reallocated");
            self.history.push(AllocationSnapshot {
                bar_index,
                timestamp,
                weights,
            });
        }

        for t in &mut self.tiers {
            t.round = TierStats::default();
        }
    }
}
