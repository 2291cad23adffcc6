// =============================================================================
// Regime Detector (spec §4.5)
// =============================================================================
//
// Classifies each symbol into one of {TRENDING_UP, TRENDING_DOWN, RANGING,
// VOLATILE} on a fixed cadence, using Bollinger Band width and EMA-20 slope.
// Grounded on the teacher's `regime::detector::RegimeDetector` structure
// (Arc-wrapped, cached-state, a `classify()` pure function, dense inline
// tests) but the classification rule itself is rewritten: the teacher's ADX/
// Hurst/entropy cascade does not match this engine's two-signal rule.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::ema::calculate_ema;
use crate::repository::{MarketRegime, Repository};
use crate::types::{RegimeKind, Timeframe};

const BOLLINGER_PERIOD: usize = 20;
const EMA_PERIOD: usize = 20;
const VOLATILE_BANDWIDTH_THRESHOLD: f64 = 0.05;
const TRENDING_SLOPE_THRESHOLD: f64 = 0.001;

/// Runs the periodic regime-classification sweep over the symbol universe.
pub struct RegimeDetector {
    repo: Arc<dyn Repository>,
}

impl RegimeDetector {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Spawn the periodic worker loop (spec §4.5's fixed cadence).
    pub fn spawn(self: Arc<Self>, symbols: Vec<String>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for symbol in &symbols {
                    if let Err(e) = self.refresh_symbol(symbol).await {
                        warn!(symbol = %symbol, error = %e, "regime refresh failed");
                    }
                }
            }
        });
    }

    pub async fn refresh_symbol(&self, symbol: &str) -> anyhow::Result<()> {
        let candles = self
            .repo
            .get_candles_by_timeframe(Timeframe::M5, symbol, 200)
            .await?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let mut regime = match classify(&closes) {
            Some(r) => r,
            None => return Ok(()),
        };
        regime.symbol = symbol.to_string();

        debug!(symbol = %symbol, regime = %regime.regime, confidence = regime.confidence, "regime classified");
        self.repo.save_market_regime(&regime).await?;
        Ok(())
    }
}

/// Pure classification logic: VOLATILE takes priority over the EMA-slope
/// rules; see spec §4.5 for the exact thresholds used here.
fn classify(closes: &[f64]) -> Option<MarketRegime> {
    if closes.len() < EMA_PERIOD + 1 {
        return None;
    }

    let bb = calculate_bollinger(closes, BOLLINGER_PERIOD, 2.0)?;
    let bollinger_width = bb.width / 100.0; // calculate_bollinger returns a percentage.

    if bollinger_width > VOLATILE_BANDWIDTH_THRESHOLD {
        return Some(MarketRegime {
            symbol: String::new(),
            calculated_at: chrono::Utc::now(),
            regime: RegimeKind::Volatile,
            confidence: 0.7,
            volatility: None,
            bollinger_width: Some(bollinger_width),
            atr: None,
        });
    }

    let ema20 = calculate_ema(closes, EMA_PERIOD);
    if ema20.len() < 2 {
        return Some(MarketRegime {
            symbol: String::new(),
            calculated_at: chrono::Utc::now(),
            regime: RegimeKind::Ranging,
            confidence: 0.5,
            volatility: None,
            bollinger_width: Some(bollinger_width),
            atr: None,
        });
    }

    let latest = ema20[ema20.len() - 1];
    let prev = ema20[ema20.len() - 2];
    if prev == 0.0 {
        return None;
    }
    let slope = (latest - prev) / prev;

    let (regime, confidence) = if slope > TRENDING_SLOPE_THRESHOLD {
        (RegimeKind::TrendingUp, (0.6 + 100.0 * slope.abs()).clamp(0.0, 1.0))
    } else if slope < -TRENDING_SLOPE_THRESHOLD {
        (RegimeKind::TrendingDown, (0.6 + 100.0 * slope.abs()).clamp(0.0, 1.0))
    } else {
        (RegimeKind::Ranging, 0.5)
    };

    Some(MarketRegime {
        symbol: String::new(),
        calculated_at: chrono::Utc::now(),
        regime,
        confidence,
        volatility: None,
        bollinger_width: Some(bollinger_width),
        atr: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_then_rising(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| 1000.0 + i as f64 * step).collect()
    }

    #[test]
    fn insufficient_data_returns_none() {
        assert!(classify(&[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn steady_uptrend_classifies_trending_up() {
        let closes = flat_then_rising(60, 2.0);
        let regime = classify(&closes).unwrap();
        assert_eq!(regime.regime, RegimeKind::TrendingUp);
    }

    #[test]
    fn steady_downtrend_classifies_trending_down() {
        let closes: Vec<f64> = (0..60).map(|i| 2000.0 - i as f64 * 2.0).collect();
        let regime = classify(&closes).unwrap();
        assert_eq!(regime.regime, RegimeKind::TrendingDown);
    }

    #[test]
    fn flat_series_classifies_ranging() {
        let closes = vec![1000.0; 60];
        let regime = classify(&closes).unwrap();
        assert_eq!(regime.regime, RegimeKind::Ranging);
        assert!((regime.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn wide_swings_classify_volatile() {
        let mut closes = Vec::new();
        for i in 0..60 {
            let base = 1000.0 + if i % 2 == 0 { 200.0 } else { -200.0 };
            closes.push(base);
        }
        let regime = classify(&closes).unwrap();
        assert_eq!(regime.regime, RegimeKind::Volatile);
        assert!((regime.confidence - 0.7).abs() < f64::EPSILON);
    }
}
