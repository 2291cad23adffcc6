// =============================================================================
// Strategy & baseline performance filter (spec §4.10-2)
// =============================================================================
//
// Two judgments folded into one stage, mirroring the spec's own bundling:
// first a haircut on the statistical baseline backing this candidate (thin
// sample, stale refresh), then a verdict on the strategy's own trading
// record — abstaining below `min_strategy_signals`, rejecting on a proven
// low win rate or a live losing streak, and boosting on a proven strong one.
// =============================================================================

use chrono::Duration as ChronoDuration;

use super::{FilterContext, FilterOutcome};

const STRICT_SAMPLE_MULTIPLIER: f64 = 0.7;
const STALE_BASELINE_MULTIPLIER: f64 = 0.9;
const STALE_BASELINE_HOURS: i64 = 2;
const STRONG_WIN_RATE_MULTIPLIER: f64 = 1.1;

pub fn evaluate(ctx: &FilterContext) -> FilterOutcome {
    let mut multiplier = 1.0;

    if let Some(baseline) = ctx.baseline {
        if baseline.sample_size < ctx.config.min_baseline_sample_size_strict {
            multiplier *= STRICT_SAMPLE_MULTIPLIER;
        }
        let age = ctx.now - baseline.calculated_at;
        if age > ChronoDuration::hours(STALE_BASELINE_HOURS) {
            multiplier *= STALE_BASELINE_MULTIPLIER;
        }
    }

    if ctx.strategy_sample_size < ctx.config.min_strategy_signals {
        return FilterOutcome::pass(multiplier);
    }

    if ctx.consecutive_losses >= ctx.config.max_consecutive_losses {
        return FilterOutcome::reject(format!(
            "{} consecutive losses at or above breaker threshold {}",
            ctx.consecutive_losses, ctx.config.max_consecutive_losses
        ));
    }

    let win_rate = match ctx.strategy_win_rate {
        Some(w) => w,
        None => return FilterOutcome::pass(multiplier),
    };

    if win_rate < ctx.config.low_win_rate_threshold {
        return FilterOutcome::reject(format!(
            "strategy win rate {:.2} below {:.2} over {} samples",
            win_rate, ctx.config.low_win_rate_threshold, ctx.strategy_sample_size
        ));
    }

    if win_rate >= ctx.config.high_win_rate_threshold {
        multiplier *= STRONG_WIN_RATE_MULTIPLIER;
    }

    FilterOutcome::pass(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::repository::StatisticalBaseline;
    use crate::types::Decision;
    use chrono::Utc;

    fn baseline(sample_size: u32, age_hours: i64) -> StatisticalBaseline {
        StatisticalBaseline {
            symbol: "BBCA".to_string(),
            calculated_at: Utc::now() - ChronoDuration::hours(age_hours),
            mean_price: 1000.0,
            stddev_price: 10.0,
            median_price: 1000.0,
            p25_price: 990.0,
            p75_price: 1010.0,
            mean_volume: 100.0,
            stddev_volume: 10.0,
            mean_value: 1_000_000.0,
            stddev_value: 100_000.0,
            sample_size,
            lookback_hours: 4.0,
        }
    }

    fn ctx(config: &EngineConfig, win_rate: Option<f64>, samples: u32) -> FilterContext<'_> {
        FilterContext {
            symbol: "BBCA",
            decision: Decision::Buy,
            regime: None,
            baseline: None,
            order_flow: None,
            strategy_win_rate: win_rate,
            strategy_sample_size: samples,
            consecutive_losses: 0,
            volume_z: 0.0,
            confidence: 0.8,
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

    fn ctx_with_baseline<'a>(config: &'a EngineConfig, baseline: &'a StatisticalBaseline) -> FilterContext<'a> {
        FilterContext {
            baseline: Some(baseline),
            ..ctx(config, None, 0)
        }
    }

    #[test]
    fn below_sample_threshold_abstains() {
        let config = EngineConfig::default();
        let outcome = evaluate(&ctx(&config, Some(0.1), 2));
        assert!(outcome.pass);
        assert!((outcome.multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn low_win_rate_with_enough_samples_rejects() {
        let config = EngineConfig::default();
        let outcome = evaluate(&ctx(&config, Some(0.2), 50));
        assert!(!outcome.pass);
    }

    #[test]
    fn high_win_rate_boosts_confidence() {
        let config = EngineConfig::default();
        let outcome = evaluate(&ctx(&config, Some(0.75), 50));
        assert!(outcome.pass);
        assert!((outcome.multiplier - STRONG_WIN_RATE_MULTIPLIER).abs() < f64::EPSILON);
    }

    #[test]
    fn middling_win_rate_is_neutral() {
        let config = EngineConfig::default();
        let outcome = evaluate(&ctx(&config, Some(0.5), 50));
        assert!(outcome.pass);
        assert!((outcome.multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn consecutive_losses_at_breaker_threshold_rejects() {
        let config = EngineConfig::default();
        let mut c = ctx(&config, Some(0.7), 50);
        c.consecutive_losses = config.max_consecutive_losses;
        let outcome = evaluate(&c);
        assert!(!outcome.pass);
    }

    #[test]
    fn consecutive_losses_below_breaker_threshold_passes() {
        let config = EngineConfig::default();
        let mut c = ctx(&config, Some(0.7), 50);
        c.consecutive_losses = config.max_consecutive_losses - 1;
        let outcome = evaluate(&c);
        assert!(outcome.pass);
    }

    #[test]
    fn breaker_does_not_fire_below_sample_threshold() {
        let config = EngineConfig::default();
        let mut c = ctx(&config, Some(0.1), 2);
        c.consecutive_losses = config.max_consecutive_losses + 5;
        let outcome = evaluate(&c);
        assert!(outcome.pass);
    }

    #[test]
    fn fresh_well_sampled_baseline_passes_clean() {
        let config = EngineConfig::default();
        let b = baseline(50, 0);
        let outcome = evaluate(&ctx_with_baseline(&config, &b));
        assert!((outcome.multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn thin_sample_gets_haircut() {
        let config = EngineConfig::default();
        let b = baseline(5, 0);
        let outcome = evaluate(&ctx_with_baseline(&config, &b));
        assert!((outcome.multiplier - STRICT_SAMPLE_MULTIPLIER).abs() < f64::EPSILON);
    }

    #[test]
    fn stale_baseline_gets_haircut() {
        let config = EngineConfig::default();
        let b = baseline(50, 3);
        let outcome = evaluate(&ctx_with_baseline(&config, &b));
        assert!((outcome.multiplier - STALE_BASELINE_MULTIPLIER).abs() < f64::EPSILON);
    }

    #[test]
    fn thin_and_stale_compound() {
        let config = EngineConfig::default();
        let b = baseline(5, 3);
        let outcome = evaluate(&ctx_with_baseline(&config, &b));
        let expected = STRICT_SAMPLE_MULTIPLIER * STALE_BASELINE_MULTIPLIER;
        assert!((outcome.multiplier - expected).abs() < 1e-9);
    }
}
