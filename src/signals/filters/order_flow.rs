// =============================================================================
// Order flow filter (spec §4.10-4)
// =============================================================================
//
// Confirms a BUY candidate against the recent aggressive-buy percentage of
// the order flow window, boosting confidence the more lopsided the flow is
// towards the candidate's direction. A large, trend-aligned volume z-score
// gets a small haircut instead of a boost — an outsized single print is more
// likely to be a one-off whale than a sign of sustained flow. A BUY candidate
// is also cross-checked against recent whale alerts: strong buy-side whale
// alignment earns its own boost, dominant sell-side whale activity rejects
// outright regardless of the order-flow ratio. Generalized from the teacher's
// OFIP (`smart_filters.rs`) buy-ratio confirm/reject gate.
// =============================================================================

use super::{FilterContext, FilterOutcome};
use crate::types::Decision;

const AGGRESSIVE_BUY_MULTIPLIER: f64 = 1.4;
const STRONG_BUY_MULTIPLIER: f64 = 1.25;
const MILD_BUY_MULTIPLIER: f64 = 1.1;
const STRONG_BUY_PCT: f64 = 0.70;
const MODERATE_BUY_PCT: f64 = 0.60;
const MILD_BUY_PCT: f64 = 0.55;
const LARGE_VOLUME_Z: f64 = 4.0;
const LARGE_VOLUME_MULTIPLIER: f64 = 0.85;
const WHALE_BUY_ALIGN_COUNT: u32 = 3;
const WHALE_SELL_DOMINANCE_COUNT: u32 = 2;
const WHALE_ALIGNMENT_MULTIPLIER: f64 = 1.5;

pub fn evaluate(ctx: &FilterContext) -> FilterOutcome {
    let flow = match ctx.order_flow {
        Some(f) => f,
        None => {
            if ctx.config.require_order_flow {
                return FilterOutcome::reject("order flow data unavailable");
            }
            return FilterOutcome::pass(1.0);
        }
    };

    let buy_pct = flow.buy_pct();
    let aligned_pct = match ctx.decision {
        Decision::Buy => buy_pct,
        Decision::Sell => 1.0 - buy_pct,
        Decision::Wait => return FilterOutcome::pass(1.0),
    };

    if ctx.config.require_order_flow && aligned_pct < ctx.config.order_flow_buy_threshold {
        return FilterOutcome::reject(format!(
            "order flow {:.2} does not confirm {} direction",
            aligned_pct, ctx.decision
        ));
    }

    let mut multiplier = if aligned_pct > ctx.config.aggressive_buy_threshold.max(STRONG_BUY_PCT) {
        AGGRESSIVE_BUY_MULTIPLIER
    } else if aligned_pct > MODERATE_BUY_PCT {
        STRONG_BUY_MULTIPLIER
    } else if aligned_pct > MILD_BUY_PCT {
        MILD_BUY_MULTIPLIER
    } else {
        1.0
    };

    if ctx.decision == Decision::Buy {
        if ctx.whale_sell_count >= WHALE_SELL_DOMINANCE_COUNT {
            return FilterOutcome::reject(format!(
                "{} sell whales dominate recent flow",
                ctx.whale_sell_count
            ));
        }
        if ctx.whale_buy_count >= WHALE_BUY_ALIGN_COUNT || ctx.whale_buy_value > ctx.config.whale_value_threshold {
            multiplier *= WHALE_ALIGNMENT_MULTIPLIER;
        }
    }

    if ctx.volume_z.abs() > LARGE_VOLUME_Z {
        multiplier *= LARGE_VOLUME_MULTIPLIER;
    }

    FilterOutcome::pass(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::repository::OrderFlowImbalance;
    use chrono::Utc;

    fn flow(buy: f64, sell: f64) -> OrderFlowImbalance {
        OrderFlowImbalance {
            symbol: "BBCA".to_string(),
            window_end: Utc::now(),
            buy_volume_lots: buy,
            sell_volume_lots: sell,
            aggressive_buy_pct: None,
            window_secs: 60,
        }
    }

    fn ctx<'a>(config: &'a EngineConfig, flow: &'a OrderFlowImbalance, decision: Decision, volume_z: f64) -> FilterContext<'a> {
        FilterContext {
            symbol: "BBCA",
            decision,
            regime: None,
            baseline: None,
            order_flow: Some(flow),
            strategy_win_rate: None,
            strategy_sample_size: 0,
            consecutive_losses: 0,
            volume_z,
            confidence: 0.6,
            price: 1000.0,
            vwap: None,
            resolved_confidence_threshold: 0.5,
            whale_buy_count: 0,
            whale_sell_count: 0,
            whale_buy_value: 0.0,
            now: Utc::now(),
            config,
        }
    }

    #[test]
    fn missing_flow_rejects_when_required() {
        let config = EngineConfig::default();
        let outcome = evaluate(&FilterContext {
            symbol: "BBCA",
            decision: Decision::Buy,
            regime: None,
            baseline: None,
            order_flow: None,
            strategy_win_rate: None,
            strategy_sample_size: 0,
            consecutive_losses: 0,
            volume_z: 0.0,
            confidence: 0.6,
            price: 1000.0,
            vwap: None,
            resolved_confidence_threshold: 0.5,
            whale_buy_count: 0,
            whale_sell_count: 0,
            whale_buy_value: 0.0,
            now: Utc::now(),
            config: &config,
        });
        assert!(!outcome.pass);
    }

    #[test]
    fn strongly_lopsided_buy_flow_gets_aggressive_multiplier() {
        let config = EngineConfig::default();
        let f = flow(90.0, 10.0);
        let outcome = evaluate(&ctx(&config, &f, Decision::Buy, 0.0));
        assert!(outcome.pass);
        assert!((outcome.multiplier - AGGRESSIVE_BUY_MULTIPLIER).abs() < f64::EPSILON);
    }

    #[test]
    fn moderately_lopsided_flow_gets_strong_multiplier() {
        let config = EngineConfig::default();
        let f = flow(65.0, 35.0);
        let outcome = evaluate(&ctx(&config, &f, Decision::Buy, 0.0));
        assert!(outcome.pass);
        assert!((outcome.multiplier - STRONG_BUY_MULTIPLIER).abs() < f64::EPSILON);
    }

    #[test]
    fn flow_against_direction_rejects() {
        let config = EngineConfig::default();
        let f = flow(20.0, 80.0);
        let outcome = evaluate(&ctx(&config, &f, Decision::Buy, 0.0));
        assert!(!outcome.pass);
    }

    #[test]
    fn large_volume_z_applies_haircut() {
        let config = EngineConfig::default();
        let f = flow(65.0, 35.0);
        let outcome = evaluate(&ctx(&config, &f, Decision::Buy, 5.0));
        let expected = STRONG_BUY_MULTIPLIER * LARGE_VOLUME_MULTIPLIER;
        assert!((outcome.multiplier - expected).abs() < 1e-9);
    }

    #[test]
    fn dominant_sell_whales_reject_buy() {
        let config = EngineConfig::default();
        let f = flow(65.0, 35.0);
        let mut c = ctx(&config, &f, Decision::Buy, 0.0);
        c.whale_sell_count = 2;
        let outcome = evaluate(&c);
        assert!(!outcome.pass);
    }

    #[test]
    fn strong_buy_whale_count_boosts_multiplier() {
        let config = EngineConfig::default();
        let f = flow(65.0, 35.0);
        let mut c = ctx(&config, &f, Decision::Buy, 0.0);
        c.whale_buy_count = 3;
        let outcome = evaluate(&c);
        let expected = STRONG_BUY_MULTIPLIER * WHALE_ALIGNMENT_MULTIPLIER;
        assert!((outcome.multiplier - expected).abs() < 1e-9);
    }

    #[test]
    fn large_buy_whale_value_boosts_multiplier_even_below_count() {
        let config = EngineConfig::default();
        let f = flow(65.0, 35.0);
        let mut c = ctx(&config, &f, Decision::Buy, 0.0);
        c.whale_buy_value = config.whale_value_threshold + 1.0;
        let outcome = evaluate(&c);
        let expected = STRONG_BUY_MULTIPLIER * WHALE_ALIGNMENT_MULTIPLIER;
        assert!((outcome.multiplier - expected).abs() < 1e-9);
    }
}
