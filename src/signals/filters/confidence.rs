// =============================================================================
// Dynamic Confidence filter (spec §4.10-3)
// =============================================================================
//
// Gates a candidate against a per-strategy confidence threshold resolved from
// historical outcomes (the Signal Generator resolves and caches it, refreshed
// every 10 min, before building this context). The threshold relaxes when the
// candidate rides an outsized, trend-aligned volume spike — the premise being
// that a strong trend-aligned print is itself corroborating evidence. A BUY
// below VWAP is rejected outright regardless of confidence.
// =============================================================================

use super::{trend_aligned, FilterContext, FilterOutcome};
use crate::types::Decision;

/// Used by the Signal Generator when no strategy-specific threshold has been
/// learned yet.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

const STRONG_VOLUME_Z: f64 = 4.0;
const STRONG_RELAXATION: f64 = 0.85;
const MILD_RELAXATION: f64 = 0.92;

pub fn evaluate(ctx: &FilterContext) -> FilterOutcome {
    let mut threshold = ctx.resolved_confidence_threshold;

    if ctx.volume_z > STRONG_VOLUME_Z && trend_aligned(ctx) {
        threshold *= STRONG_RELAXATION;
    } else if trend_aligned(ctx) && ctx.volume_z > 0.0 {
        threshold *= MILD_RELAXATION;
    }

    if ctx.decision == Decision::Buy {
        if let Some(vwap) = ctx.vwap {
            if ctx.price < vwap {
                return FilterOutcome::reject(format!(
                    "price {:.2} below vwap {:.2}",
                    ctx.price, vwap
                ));
            }
        }
    }

    if ctx.confidence < threshold {
        return FilterOutcome::reject(format!(
            "confidence {:.2} below resolved threshold {:.2}",
            ctx.confidence, threshold
        ));
    }

    FilterOutcome::pass(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::repository::MarketRegime;
    use crate::types::RegimeKind;
    use chrono::Utc;

    fn base_ctx(config: &EngineConfig) -> FilterContext<'_> {
        FilterContext {
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
            config,
        }
    }

    #[test]
    fn confidence_above_threshold_passes() {
        let config = EngineConfig::default();
        let outcome = evaluate(&base_ctx(&config));
        assert!(outcome.pass);
    }

    #[test]
    fn confidence_below_threshold_rejects() {
        let config = EngineConfig::default();
        let mut ctx = base_ctx(&config);
        ctx.confidence = 0.3;
        let outcome = evaluate(&ctx);
        assert!(!outcome.pass);
    }

    #[test]
    fn buy_below_vwap_rejects_regardless_of_confidence() {
        let config = EngineConfig::default();
        let mut ctx = base_ctx(&config);
        ctx.confidence = 0.9;
        ctx.price = 990.0;
        ctx.vwap = Some(1000.0);
        let outcome = evaluate(&ctx);
        assert!(!outcome.pass);
    }

    #[test]
    fn sell_below_vwap_is_unaffected() {
        let config = EngineConfig::default();
        let mut ctx = base_ctx(&config);
        ctx.decision = Decision::Sell;
        ctx.confidence = 0.6;
        ctx.price = 990.0;
        ctx.vwap = Some(1000.0);
        let outcome = evaluate(&ctx);
        assert!(outcome.pass);
    }

    #[test]
    fn strong_trend_aligned_volume_spike_relaxes_threshold() {
        let config = EngineConfig::default();
        let regime = MarketRegime {
            symbol: "BBCA".to_string(),
            calculated_at: Utc::now(),
            regime: RegimeKind::TrendingUp,
            confidence: 0.8,
            volatility: None,
            bollinger_width: None,
            atr: None,
        };
        let mut ctx = base_ctx(&config);
        ctx.regime = Some(&regime);
        ctx.volume_z = 5.0;
        ctx.resolved_confidence_threshold = 0.55;
        // 0.55 * 0.85 = 0.4675, so a candidate confidence of 0.5 now clears it.
        ctx.confidence = 0.5;
        let outcome = evaluate(&ctx);
        assert!(outcome.pass);
    }

    #[test]
    fn mild_trend_aligned_volume_relaxes_threshold_less() {
        let config = EngineConfig::default();
        let regime = MarketRegime {
            symbol: "BBCA".to_string(),
            calculated_at: Utc::now(),
            regime: RegimeKind::TrendingUp,
            confidence: 0.8,
            volatility: None,
            bollinger_width: None,
            atr: None,
        };
        let mut ctx = base_ctx(&config);
        ctx.regime = Some(&regime);
        ctx.volume_z = 1.0;
        ctx.resolved_confidence_threshold = 0.55;
        // 0.55 * 0.92 = 0.506, a candidate confidence of 0.5 still falls short.
        ctx.confidence = 0.5;
        let outcome = evaluate(&ctx);
        assert!(!outcome.pass);
    }
}
