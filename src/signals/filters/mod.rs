// =============================================================================
// Filter Pipeline (spec §4.10)
// =============================================================================
//
// Five ordered stages, each independently gating a candidate signal and
// contributing a confidence multiplier: regime alignment, strategy/baseline
// performance, baseline confidence, order-flow confirmation, time-of-day.
// A candidate that fails any stage is rejected with that stage's reason; a
// candidate that clears every stage has its confidence scaled by the product
// of all five multipliers.
//
// Generalized from the teacher's `smart_filters::SmartFilterEngine::evaluate`
// shape (sequential feature-gated checks, each returning an optional reject
// reason) — split one stage per file and extended so a passing stage can
// also carry a multiplier, not just a pass/fail verdict.
// =============================================================================

pub mod confidence;
pub mod order_flow;
pub mod regime;
pub mod strategy_performance;
pub mod time_of_day;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::repository::{MarketRegime, OrderFlowImbalance, StatisticalBaseline};
use crate::types::{Decision, RegimeKind};

/// Everything a filter stage needs to render a verdict. Populated once per
/// candidate by the Signal Generator before the pipeline runs.
pub struct FilterContext<'a> {
    pub symbol: &'a str,
    pub decision: Decision,
    pub regime: Option<&'a MarketRegime>,
    pub baseline: Option<&'a StatisticalBaseline>,
    pub order_flow: Option<&'a OrderFlowImbalance>,
    pub strategy_win_rate: Option<f64>,
    pub strategy_sample_size: u32,
    pub consecutive_losses: u32,
    pub volume_z: f64,
    /// Candidate's pre-pipeline scorecard confidence (0.0-1.0).
    pub confidence: f64,
    pub price: f64,
    pub vwap: Option<f64>,
    pub resolved_confidence_threshold: f64,
    pub whale_buy_count: u32,
    pub whale_sell_count: u32,
    pub whale_buy_value: f64,
    pub now: DateTime<Utc>,
    pub config: &'a EngineConfig,
}

/// Shared by the Dynamic Confidence and Order Flow stages: whether the
/// candidate's direction matches an up-trending regime. TRENDING_DOWN never
/// reaches either stage since the regime filter rejects it outright.
pub fn trend_aligned(ctx: &FilterContext) -> bool {
    match ctx.regime {
        Some(r) => r.regime == RegimeKind::TrendingUp && ctx.decision == Decision::Buy,
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub pass: bool,
    pub reason: String,
    pub multiplier: f64,
}

impl FilterOutcome {
    pub fn pass(multiplier: f64) -> Self {
        Self {
            pass: true,
            reason: String::new(),
            multiplier,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            reason: reason.into(),
            multiplier: 1.0,
        }
    }
}

pub type FilterStage = fn(&FilterContext) -> FilterOutcome;

/// The five stages, run in spec order. The Signal Generator folds this list
/// into a single pass/reject + combined multiplier.
pub const PIPELINE: [(&str, FilterStage); 5] = [
    ("regime", regime::evaluate),
    ("strategy_performance", strategy_performance::evaluate),
    ("confidence", confidence::evaluate),
    ("order_flow", order_flow::evaluate),
    ("time_of_day", time_of_day::evaluate),
];

/// Run every stage in order, short-circuiting on the first rejection.
/// Returns the combined multiplier on success.
pub fn run_pipeline(ctx: &FilterContext) -> Result<f64, String> {
    let mut multiplier = 1.0;
    for (name, stage) in PIPELINE {
        let outcome = stage(ctx);
        if !outcome.pass {
            return Err(format!("{name}: {}", outcome.reason));
        }
        multiplier *= outcome.multiplier;
    }
    Ok(multiplier)
}
