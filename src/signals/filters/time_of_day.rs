// =============================================================================
// Time-of-day filter (spec §4.10-5)
// =============================================================================
//
// Never rejects outright; applies a confidence boost during the 10:00-11:00
// local exchange window, which historically carries the strongest
// continuation moves after the morning open settles. All other hours pass
// through unchanged.
// =============================================================================

use chrono::Timelike;

use super::{FilterContext, FilterOutcome};

const BOOST_WINDOW_START_HOUR: u32 = 10;
const BOOST_WINDOW_END_HOUR: u32 = 11;
const BOOST_MULTIPLIER: f64 = 1.25;

pub fn evaluate(ctx: &FilterContext) -> FilterOutcome {
    let hour = ctx.now.hour();
    if (BOOST_WINDOW_START_HOUR..BOOST_WINDOW_END_HOUR).contains(&hour) {
        FilterOutcome::pass(BOOST_MULTIPLIER)
    } else {
        FilterOutcome::pass(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::Decision;
    use chrono::TimeZone;
    use chrono::Utc;

    fn ctx(config: &EngineConfig, hour: u32) -> FilterContext<'_> {
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
            now: Utc.with_ymd_and_hms(2026, 7, 28, hour, 30, 0).unwrap(),
            config,
        }
    }

    #[test]
    fn boost_window_applies_multiplier() {
        let config = EngineConfig::default();
        let outcome = evaluate(&ctx(&config, 10));
        assert!((outcome.multiplier - BOOST_MULTIPLIER).abs() < f64::EPSILON);
    }

    #[test]
    fn outside_window_is_neutral() {
        let config = EngineConfig::default();
        let outcome = evaluate(&ctx(&config, 14));
        assert!((outcome.multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn never_rejects() {
        let config = EngineConfig::default();
        for hour in 0..24 {
            assert!(evaluate(&ctx(&config, hour)).pass);
        }
    }
}
