//! Risk sizer: converts an approved signal into a position size and a risk
//! reservation.
//!
//! ```text
//! risk_amount   = equity × risk_fraction
//! stop_distance = |entry − stop|
//! quantity      = risk_amount × leverage / stop_distance
//! ```
//!
//! Then, in order: clamp the risk to the remaining aggregate headroom,
//! guard the stop against the liquidation price, and clamp the notional to
//! the margin budget. Every clamp is recorded and logged.

pub mod liquidation;

pub use liquidation::{liquidation_price, max_safe_leverage, stop_is_safe};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{LiquidationPolicy, SizingConfig};
use crate::domain::PositionSide;
use crate::error::EngineError;

/// Inputs for one sizing decision.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingRequest {
    pub side: PositionSide,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub equity: f64,
    /// Already regime-, tier- and allocation-adjusted.
    pub risk_fraction: f64,
    pub leverage: f64,
    pub risk_in_use: f64,
    pub max_aggregate_risk_pct: f64,
    pub max_margin_usage_pct: f64,
}

/// A clamp applied while sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizingAdjustment {
    AllocationScaleClamped { raw: f64, applied: f64 },
    RiskClampedToHeadroom { requested: f64, granted: f64 },
    LeverageRescaled { requested: f64, granted: f64 },
    NotionalClamped { requested_qty: f64, granted_qty: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingDecision {
    pub quantity: f64,
    pub risk_amount: f64,
    pub leverage: f64,
    pub stop_distance: f64,
    pub notional: f64,
    pub liquidation_price: f64,
    pub adjustments: Vec<SizingAdjustment>,
}

impl SizingDecision {
    pub fn leverage_rescaled(&self) -> bool {
        self.adjustments
            .iter()
            .any(|a| matches!(a, SizingAdjustment::LeverageRescaled { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct RiskSizer {
    config: SizingConfig,
}

impl RiskSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn default_params() -> Self {
        Self::new(SizingConfig::default())
    }

    pub fn name(&self) -> &str {
        "risk_sizer"
    }

    /// Per-trade risk fraction for a tier: base × multiplier × allocation
    /// scale, where the scale is `weight × tier_count` (1.0 for equal
    /// weights) clamped to the configured band.
    pub fn risk_fraction(
        &self,
        base: f64,
        risk_multiplier: f64,
        weight: f64,
        tier_count: usize,
    ) -> (f64, Option<SizingAdjustment>) {
        let raw = weight * tier_count as f64;
        let applied = raw.clamp(self.config.min_allocation_scale, self.config.max_allocation_scale);
        let adjustment = if (applied - raw).abs() > 1e-12 {
            Some(SizingAdjustment::AllocationScaleClamped { raw, applied })
        } else {
            None
        };
        (base * risk_multiplier * applied, adjustment)
    }

    pub fn size(&self, req: &SizingRequest) -> Result<SizingDecision, EngineError> {
        let invalid_stop = || EngineError::InvalidStopDistance {
            entry: req.entry_price,
            stop: req.stop_loss,
        };
        let stop_distance = (req.entry_price - req.stop_loss).abs();
        if !(stop_distance.is_finite() && stop_distance > 0.0) {
            return Err(invalid_stop());
        }
        // A stop on the profit side is as unusable as a zero distance.
        if req.side.favorable_move(req.stop_loss, req.entry_price) <= 0.0 {
            return Err(invalid_stop());
        }

        let mut adjustments = Vec::new();

        // ── Aggregate headroom ──
        let ceiling = req.equity * req.max_aggregate_risk_pct;
        let headroom = ceiling - req.risk_in_use;
        if headroom <= 1e-9 {
            return Err(EngineError::NoRiskCapacity {
                in_use: req.risk_in_use,
                ceiling,
            });
        }
        let mut risk_amount = req.equity * req.risk_fraction;
        if risk_amount > headroom {
            warn!(
                requested = risk_amount,
                granted = headroom,
                "risk clamped to aggregate headroom"
            );
            adjustments.push(SizingAdjustment::RiskClampedToHeadroom {
                requested: risk_amount,
                granted: headroom,
            });
            risk_amount = headroom;
        }

        // ── Liquidation guard ──
        let mmr = self.config.maintenance_margin_rate;
        let buffer = self.config.liquidation_buffer_pct;
        let mut leverage = req.leverage;
        if !stop_is_safe(req.side, req.entry_price, req.stop_loss, leverage, mmr, buffer) {
            let liquidation = liquidation_price(req.side, req.entry_price, leverage, mmr);
            let rejection = EngineError::LiquidationRisk {
                stop: req.stop_loss,
                liquidation,
                leverage,
            };
            if self.config.liquidation_policy == LiquidationPolicy::Reject {
                return Err(rejection);
            }
            let max_safe = max_safe_leverage(req.side, req.entry_price, req.stop_loss, mmr, buffer);
            let safe = (max_safe * 100.0).floor() / 100.0;
            if safe < 1.0 {
                return Err(rejection);
            }
            warn!(requested = leverage, granted = safe, "leverage rescaled for liquidation buffer");
            adjustments.push(SizingAdjustment::LeverageRescaled {
                requested: leverage,
                granted: safe,
            });
            leverage = safe;
        }

        let mut quantity = risk_amount * leverage / stop_distance;

        // ── Margin budget ──
        let max_notional = req.equity * req.max_margin_usage_pct * leverage;
        if quantity * req.entry_price > max_notional {
            let granted = max_notional / req.entry_price;
            warn!(
                requested_qty = quantity,
                granted_qty = granted,
                "notional clamped to margin budget"
            );
            adjustments.push(SizingAdjustment::NotionalClamped {
                requested_qty: quantity,
                granted_qty: granted,
            });
            risk_amount *= granted / quantity;
            quantity = granted;
        }

        Ok(SizingDecision {
            quantity,
            risk_amount,
            leverage,
            stop_distance,
            notional: quantity * req.entry_price,
            liquidation_price: liquidation_price(req.side, req.entry_price, leverage, mmr),
            adjustments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SizingRequest {
        SizingRequest {
            side: PositionSide::Long,
            entry_price: 100.0,
            stop_loss: 95.0,
            equity: 10_000.0,
            risk_fraction: 0.02,
            leverage: 1.0,
            risk_in_use: 0.0,
            max_aggregate_risk_pct: 0.1,
            max_margin_usage_pct: 1.0,
        }
    }

    #[test]
    fn reference_sizing() {
        let d = RiskSizer::default_params().size(&request()).unwrap();
        assert!((d.risk_amount - 200.0).abs() < 1e-9);
        assert!((d.stop_distance - 5.0).abs() < 1e-9);
        assert!((d.quantity - 40.0).abs() < 1e-9);
        assert!(d.adjustments.is_empty());
    }

    #[test]
    fn zero_distance_is_invalid() {
        let mut r = request();
        r.stop_loss = 100.0;
        assert!(matches!(
            RiskSizer::default_params().size(&r),
            Err(EngineError::InvalidStopDistance { .. })
        ));
        r.stop_loss = 105.0;
        assert!(RiskSizer::default_params().size(&r).is_err());
    }

    #[test]
    fn risk_clamped_to_headroom() {
        let mut r = request();
        r.risk_in_use = 900.0;
        let d = RiskSizer::default_params().size(&r).unwrap();
        assert!((d.risk_amount - 100.0).abs() < 1e-9);
        assert!((d.quantity - 20.0).abs() < 1e-9);
        assert!(matches!(d.adjustments[0], SizingAdjustment::RiskClampedToHeadroom { .. }));
    }

    #[test]
    fn no_headroom_is_no_capacity() {
        let mut r = request();
        r.risk_in_use = 1_000.0;
        assert!(matches!(
            RiskSizer::default_params().size(&r),
            Err(EngineError::NoRiskCapacity { .. })
        ));
    }

    #[test]
    fn notional_clamp_shrinks_risk_too() {
        let mut r = request();
        r.max_margin_usage_pct = 0.2; // cap notional at 2,000
        let d = RiskSizer::default_params().size(&r).unwrap();
        assert!((d.quantity - 20.0).abs() < 1e-9);
        assert!((d.risk_amount - 100.0).abs() < 1e-9);
        assert!((d.notional - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn unsafe_leverage_is_rescaled() {
        let mut r = request();
        r.stop_loss = 90.0;
        r.leverage = 20.0;
        let d = RiskSizer::default_params().size(&r).unwrap();
        assert!(d.leverage_rescaled());
        assert!(d.leverage >= 1.0 && d.leverage < 20.0);
        assert!(stop_is_safe(PositionSide::Long, 100.0, 90.0, d.leverage, 0.005, 0.005));
        assert!((d.quantity - 200.0 * d.leverage / 10.0).abs() < 1e-9);
    }

    #[test]
    fn reject_policy_refuses_unsafe_leverage() {
        let sizer = RiskSizer::new(SizingConfig {
            liquidation_policy: LiquidationPolicy::Reject,
            ..SizingConfig::default()
        });
        let mut r = request();
        r.stop_loss = 90.0;
        r.leverage = 20.0;
        assert!(matches!(sizer.size(&r), Err(EngineError::LiquidationRisk { .. })));
    }

    #[test]
    fn stop_beyond_full_margin_is_rejected_even_when_rescaling() {
        let mut r = request();
        r.stop_loss = 0.8;
        r.leverage = 2.0;
        assert!(matches!(
            RiskSizer::default_params().size(&r),
            Err(EngineError::LiquidationRisk { .. })
        ));
    }

    #[test]
    fn allocation_scale_is_clamped() {
        let sizer = RiskSizer::default_params();
        let (f, adj) = sizer.risk_fraction(0.01, 1.0, 1.0 / 3.0, 3);
        assert!((f - 0.01).abs() < 1e-12);
        assert!(adj.is_none());
        let (f, adj) = sizer.risk_fraction(0.01, 1.5, 0.9, 3);
        assert!((f - 0.03).abs() < 1e-12);
        assert!(matches!(adj, Some(SizingAdjustment::AllocationScaleClamped { .. })));
    }
}
