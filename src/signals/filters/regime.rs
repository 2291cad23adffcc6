// =============================================================================
// Regime filter (spec §4.10-1)
// =============================================================================
//
// Requires a fresh `MarketRegime` and rejects candidates whose direction
// does not fit it: VOLATILE and TRENDING_DOWN always reject, regardless of
// the candidate's direction — a TRENDING_DOWN market offers no aligned
// entries this engine trades. RANGING passes with a confidence haircut,
// TRENDING_UP passes with a boost that is larger when the regime's own
// confidence is high. Mirrors the teacher's `smart_filters.rs` Dead regime,
// whose adaptive threshold of 999.0 makes it unenterable in practice.
// =============================================================================

use chrono::Duration as ChronoDuration;

use super::{FilterContext, FilterOutcome};
use crate::types::{Decision, RegimeKind};

const RANGING_MIN_CONFIDENCE: f64 = 0.6;
const RANGING_MULTIPLIER: f64 = 0.8;
const TRENDING_MIN_CONFIDENCE: f64 = 0.7;
const TRENDING_STRONG_MULTIPLIER: f64 = 1.5;
const TRENDING_WEAK_MULTIPLIER: f64 = 1.2;
const REGIME_FRESHNESS_MINUTES: i64 = 30;

pub fn evaluate(ctx: &FilterContext) -> FilterOutcome {
    let regime = match ctx.regime {
        Some(r) => r,
        None => return FilterOutcome::pass(1.0),
    };

    let age = ctx.now - regime.calculated_at;
    if age > ChronoDuration::minutes(REGIME_FRESHNESS_MINUTES) {
        return FilterOutcome::reject(format!(
            "market regime is stale ({} min old)",
            age.num_minutes()
        ));
    }

    match regime.regime {
        RegimeKind::Volatile => FilterOutcome::reject("volatile regime blocks entries"),
        RegimeKind::TrendingDown => FilterOutcome::reject("trending-down regime blocks entries"),
        RegimeKind::Ranging => {
            if regime.confidence >= RANGING_MIN_CONFIDENCE {
                FilterOutcome::pass(RANGING_MULTIPLIER)
            } else {
                FilterOutcome::reject(format!(
                    "ranging regime confidence {:.2} below {:.2}",
                    regime.confidence, RANGING_MIN_CONFIDENCE
                ))
            }
        }
        RegimeKind::TrendingUp => trending(ctx.decision == Decision::Buy, regime.confidence),
        RegimeKind::Neutral => FilterOutcome::pass(1.0),
    }
}

fn trending(aligned: bool, confidence: f64) -> FilterOutcome {
    if !aligned {
        return FilterOutcome::reject("trend direction opposes candidate decision");
    }
    if confidence > TRENDING_MIN_CONFIDENCE {
        FilterOutcome::pass(TRENDING_STRONG_MULTIPLIER)
    } else {
        FilterOutcome::pass(TRENDING_WEAK_MULTIPLIER)
    }
}
