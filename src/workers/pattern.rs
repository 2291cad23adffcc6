// =============================================================================
// Pattern Detector (spec §4.6)
// =============================================================================
//
// Scans each symbol's recent M5 candle history for two structural patterns:
//
// - Range Breakout: close breaks above the recent range high by more than
//   half of a dynamic threshold τ = max(1%, 2 · stddev_price/mean_price),
//   confirmed by above-average volume on the breakout bar.
// - Double Bottom: two comparable swing lows separated by a rebound, broken
//   to the upside through the neckline (the rebound high between them).
//
// Grounded on the teacher's periodic-worker shape (`tokio::time::interval` +
// per-symbol sweep, same as `workers/regime.rs` and `workers/baseline.rs`);
// the pattern-recognition algorithms themselves are new, since the teacher
// has no structural chart-pattern detector — the closest precedent in the
// pack is Binance-kline-window scanning, which this reuses for the
// sliding-window shape only.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::repository::{DetectedPattern, Repository};
use crate::types::{PatternDirection, PatternOutcome, PatternType, Timeframe};

const LOOKBACK_CANDLES: u32 = 60;
const MIN_CANDLES: usize = 20;
const MIN_BREAKOUT_TAU: f64 = 0.01;
const BASE_CONFIDENCE: f64 = 0.7;
const VOLUME_BOOSTED_CONFIDENCE: f64 = 0.85;
const DOUBLE_BOTTOM_CONFIDENCE: f64 = 0.8;
const SWING_TOLERANCE: f64 = 0.015;

pub struct PatternDetector {
    repo: Arc<dyn Repository>,
}

impl PatternDetector {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub fn spawn(self: Arc<Self>, symbols: Vec<String>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for symbol in &symbols {
                    if let Err(e) = self.scan_symbol(symbol).await {
                        warn!(symbol = %symbol, error = %e, "pattern scan failed");
                    }
                }
            }
        });
    }

    pub async fn scan_symbol(&self, symbol: &str) -> anyhow::Result<()> {
        let candles = self
            .repo
            .get_candles_by_timeframe(Timeframe::M5, symbol, LOOKBACK_CANDLES)
            .await?;
        if candles.len() < MIN_CANDLES {
            return Ok(());
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume_lots).collect();

        if let Some(pattern) = detect_range_breakout(&closes, &highs, &volumes) {
            debug!(symbol = %symbol, pattern = %pattern.pattern_type, "range breakout detected");
            let mut pattern = pattern;
            pattern.symbol = symbol.to_string();
            self.repo.save_detected_pattern(&pattern).await?;
        }

        if let Some(pattern) = detect_double_bottom(&closes, &lows) {
            debug!(symbol = %symbol, pattern = %pattern.pattern_type, "double bottom detected");
            let mut pattern = pattern;
            pattern.symbol = symbol.to_string();
            self.repo.save_detected_pattern(&pattern).await?;
        }

        Ok(())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn stddev(values: &[f64], m: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Spec §4.6: dynamic breakout threshold τ, never below 1%.
fn breakout_tau(closes: &[f64]) -> f64 {
    let m = mean(closes);
    if m <= 0.0 {
        return MIN_BREAKOUT_TAU;
    }
    let sd = stddev(closes, m);
    (2.0 * sd / m).max(MIN_BREAKOUT_TAU)
}

fn detect_range_breakout(closes: &[f64], highs: &[f64], volumes: &[f64]) -> Option<DetectedPattern> {
    let last_idx = closes.len() - 1;
    let last_close = closes[last_idx];
    let prior_highs = &highs[..last_idx];
    let range_high = prior_highs.iter().cloned().fold(f64::MIN, f64::max);
    if !range_high.is_finite() || range_high <= 0.0 {
        return None;
    }

    let tau = breakout_tau(closes);
    let breakout_level = range_high * (1.0 + tau / 2.0);
    if last_close <= breakout_level {
        return None;
    }

    let avg_volume = mean(&volumes[..last_idx]);
    let volume_confirmed = avg_volume > 0.0 && volumes[last_idx] > avg_volume;

    let confidence = if volume_confirmed {
        VOLUME_BOOSTED_CONFIDENCE
    } else {
        BASE_CONFIDENCE
    };

    Some(DetectedPattern {
        id: 0,
        symbol: String::new(),
        detected_at: chrono::Utc::now(),
        pattern_type: PatternType::RangeBreakout,
        direction: Some(PatternDirection::Bullish),
        confidence,
        breakout_level,
        outcome: PatternOutcome::Pending,
    })
}

/// Spec §4.6: two swing lows within `SWING_TOLERANCE` of each other, with a
/// rebound between them and a subsequent neckline break above the rebound
/// high.
fn detect_double_bottom(closes: &[f64], lows: &[f64]) -> Option<DetectedPattern> {
    let n = lows.len();
    if n < MIN_CANDLES {
        return None;
    }

    let (first_idx, first_low) = local_minimum(lows, 0, n / 2)?;
    let (second_idx, second_low) = local_minimum(lows, n / 2, n)?;
    if second_idx <= first_idx {
        return None;
    }

    let avg_low = (first_low + second_low) / 2.0;
    if avg_low <= 0.0 || (first_low - second_low).abs() / avg_low > SWING_TOLERANCE {
        return None;
    }

    let neckline = lows[first_idx..second_idx]
        .iter()
        .cloned()
        .fold(f64::MIN, f64::max)
        .max(closes[first_idx..second_idx].iter().cloned().fold(f64::MIN, f64::max));
    if !neckline.is_finite() {
        return None;
    }

    let last_close = closes[n - 1];
    if last_close <= neckline {
        return None;
    }

    Some(DetectedPattern {
        id: 0,
        symbol: String::new(),
        detected_at: chrono::Utc::now(),
        pattern_type: PatternType::DoubleBottom,
        direction: Some(PatternDirection::Bullish),
        confidence: DOUBLE_BOTTOM_CONFIDENCE,
        breakout_level: neckline,
        outcome: PatternOutcome::Pending,
    })
}

fn local_minimum(values: &[f64], start: usize, end: usize) -> Option<(usize, f64)> {
    values[start..end]
        .iter()
        .enumerate()
        .map(|(i, v)| (start + i, *v))
        .fold(None, |acc, (i, v)| match acc {
            None => Some((i, v)),
            Some((_, best)) if v < best => Some((i, v)),
            some => some,
        })
}
