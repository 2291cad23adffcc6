// =============================================================================
// Scorecard (spec §4.9)
// =============================================================================
//
// Scores a candidate signal across four independent 0-25 point categories —
// trigger strength, regime alignment, order-flow confirmation, and pattern
// confluence — for a 0-100 total. A candidate only reaches the Filter
// Pipeline once its total clears `config.min_score_for_signal`.
//
// Generalized from the teacher's `signals/weighted_score::WeightedScorer`
// (per-factor contributions summed into one score) but capped to four fixed
// categories at 25 points each instead of an open-ended weighted sum, and
// the categories are the engine's own concerns (trigger/regime/flow/pattern)
// rather than the teacher's indicator basket (RSI/ADX/BBW/...).
// =============================================================================

use crate::repository::{DetectedPattern, MarketRegime, OrderFlowImbalance};
use crate::types::{Decision, PatternDirection, RegimeKind};

const CATEGORY_MAX: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScorecardResult {
    pub trigger_score: f64,
    pub regime_score: f64,
    pub order_flow_score: f64,
    pub pattern_score: f64,
}

impl ScorecardResult {
    pub fn total(&self) -> f64 {
        self.trigger_score + self.regime_score + self.order_flow_score + self.pattern_score
    }
}

pub struct ScorecardInput<'a> {
    pub decision: Decision,
    pub price_z: f64,
    pub volume_z: f64,
    pub regime: Option<&'a MarketRegime>,
    pub order_flow: Option<&'a OrderFlowImbalance>,
    pub recent_pattern: Option<&'a DetectedPattern>,
}

pub fn score(input: &ScorecardInput) -> ScorecardResult {
    ScorecardResult {
        trigger_score: trigger_score(input.price_z, input.volume_z),
        regime_score: regime_score(input.decision, input.regime),
        order_flow_score: order_flow_score(input.decision, input.order_flow),
        pattern_score: pattern_score(input.decision, input.recent_pattern),
    }
}

/// Trigger strength grows with the magnitude of the price/volume z-scores
/// that caused the candidate to be raised in the first place.
fn trigger_score(price_z: f64, volume_z: f64) -> f64 {
    let magnitude = (price_z.abs() + volume_z.abs()) / 2.0;
    (magnitude * 5.0).min(CATEGORY_MAX)
}

fn regime_score(decision: Decision, regime: Option<&MarketRegime>) -> f64 {
    let regime = match regime {
        Some(r) => r,
        None => return CATEGORY_MAX / 2.0,
    };

    let aligned = match (decision, regime.regime) {
        (Decision::Buy, RegimeKind::TrendingUp) => true,
        (Decision::Sell, RegimeKind::TrendingDown) => true,
        (_, RegimeKind::Ranging) => true,
        _ => false,
    };

    if !aligned {
        return 0.0;
    }

    (regime.confidence * CATEGORY_MAX).min(CATEGORY_MAX)
}

fn order_flow_score(decision: Decision, order_flow: Option<&OrderFlowImbalance>) -> f64 {
    let flow = match order_flow {
        Some(f) => f,
        None => return CATEGORY_MAX / 2.0,
    };

    let buy_pct = flow.buy_pct();
    let aligned_pct = match decision {
        Decision::Buy => buy_pct,
        Decision::Sell => 1.0 - buy_pct,
        Decision::Wait => return 0.0,
    };

    (aligned_pct * CATEGORY_MAX).clamp(0.0, CATEGORY_MAX)
}

fn pattern_score(decision: Decision, pattern: Option<&DetectedPattern>) -> f64 {
    let pattern = match pattern {
        Some(p) => p,
        None => return 0.0,
    };

    let aligned = match (decision, pattern.direction) {
        (Decision::Buy, Some(PatternDirection::Bullish)) => true,
        (Decision::Sell, Some(PatternDirection::Bearish)) => true,
        _ => false,
    };

    if !aligned {
        return 0.0;
    }

    (pattern.confidence * CATEGORY_MAX).min(CATEGORY_MAX)
}
