// =============================================================================
// Baseline Calculator (spec §4.4)
// =============================================================================
//
// Periodically recomputes each symbol's `StatisticalBaseline` — mean/stddev/
// percentiles of price, volume, and value — from recent trade history. Tries
// a short primary lookback first; if that window doesn't have enough trades
// to be statistically meaningful, falls back to a longer tier. Grounded on
// the teacher's fixed-cadence spawn loop in `main.rs` (`tokio::time::interval`
// + per-symbol iteration); the tiered-lookback fallback is new — it exists
// because `config.rs` already distinguishes a lenient
// `min_baseline_sample_size` from a `min_baseline_sample_size_strict`.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::repository::{Repository, StatisticalBaseline, Trade};

const PRIMARY_LOOKBACK_HOURS: f64 = 4.0;
const FALLBACK_LOOKBACK_HOURS: f64 = 24.0;

pub struct BaselineCalculator {
    repo: Arc<dyn Repository>,
    config: Arc<EngineConfig>,
}

impl BaselineCalculator {
    pub fn new(repo: Arc<dyn Repository>, config: Arc<EngineConfig>) -> Self {
        Self { repo, config }
    }

    pub fn spawn(self: Arc<Self>, symbols: Vec<String>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh_all(&symbols).await {
                    warn!(error = %e, "baseline refresh batch failed");
                }
            }
        });
    }

    pub async fn refresh_all(&self, symbols: &[String]) -> anyhow::Result<()> {
        let mut baselines = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if let Some(baseline) = self.compute_for_symbol(symbol).await? {
                baselines.push(baseline);
            }
        }
        if !baselines.is_empty() {
            debug!(count = baselines.len(), "baselines recomputed");
            self.repo.batch_save_statistical_baselines(&baselines).await?;
        }
        Ok(())
    }

    async fn compute_for_symbol(&self, symbol: &str) -> anyhow::Result<Option<StatisticalBaseline>> {
        let now = Utc::now();
        let primary_start = now - chrono::Duration::seconds((PRIMARY_LOOKBACK_HOURS * 3600.0) as i64);
        let mut trades = self.repo.get_trades_by_time_range(symbol, primary_start, now).await?;
        let mut lookback_hours = PRIMARY_LOOKBACK_HOURS;

        if (trades.len() as u32) < self.config.min_baseline_sample_size {
            let fallback_start =
                now - chrono::Duration::seconds((FALLBACK_LOOKBACK_HOURS * 3600.0) as i64);
            trades = self.repo.get_trades_by_time_range(symbol, fallback_start, now).await?;
            lookback_hours = FALLBACK_LOOKBACK_HOURS;
        }

        if trades.is_empty() {
            return Ok(None);
        }

        Ok(Some(baseline_from_trades(symbol, &trades, lookback_hours, now)))
    }
}

fn baseline_from_trades(
    symbol: &str,
    trades: &[Trade],
    lookback_hours: f64,
    calculated_at: chrono::DateTime<Utc>,
) -> StatisticalBaseline {
    let prices: Vec<f64> = trades.iter().map(|t| t.price).collect();
    let volumes: Vec<f64> = trades.iter().map(|t| t.volume_lots).collect();
    let values: Vec<f64> = trades.iter().map(|t| t.total_value).collect();

    let (mean_price, stddev_price) = mean_stddev(&prices);
    let (mean_volume, stddev_volume) = mean_stddev(&volumes);
    let (mean_value, stddev_value) = mean_stddev(&values);
    let (median_price, p25_price, p75_price) = percentiles(&prices);

    StatisticalBaseline {
        symbol: symbol.to_string(),
        calculated_at,
        mean_price,
        stddev_price,
        median_price,
        p25_price,
        p75_price,
        mean_volume,
        stddev_volume,
        mean_value,
        stddev_value,
        sample_size: trades.len() as u32,
        lookback_hours,
    }
}

fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn percentiles(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    (percentile(&sorted, 0.50), percentile(&sorted, 0.25), percentile(&sorted, 0.75))
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Board};

    fn trade(price: f64, lots: f64) -> Trade {
        Trade {
            id: 0,
            detected_at: Utc::now(),
            symbol: "BBCA".to_string(),
            price,
            volume_lots: lots,
            total_value: price * lots * 100.0,
            action: Action::Buy,
            board: Board::Rg,
            seq: 1,
        }
    }

    #[test]
    fn mean_stddev_of_constant_series_is_zero_variance() {
        let (mean, stddev) = mean_stddev(&[10.0, 10.0, 10.0]);
        assert!((mean - 10.0).abs() < f64::EPSILON);
        assert!((stddev - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percentiles_of_sorted_series() {
        let (median, p25, p75) = percentiles(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((median - 3.0).abs() < f64::EPSILON);
        assert!(p25 < median && median < p75);
    }

    #[test]
    fn baseline_from_trades_captures_sample_size_and_lookback() {
        let trades = vec![trade(1000.0, 10.0), trade(1010.0, 5.0), trade(990.0, 8.0)];
        let baseline = baseline_from_trades("BBCA", &trades, 4.0, Utc::now());
        assert_eq!(baseline.sample_size, 3);
        assert!((baseline.lookback_hours - 4.0).abs() < f64::EPSILON);
        assert!(baseline.mean_price > 0.0);
    }

    #[test]
    fn empty_trades_yields_no_baseline_fields_nan() {
        let baseline = baseline_from_trades("BBCA", &[], 4.0, Utc::now());
        assert_eq!(baseline.sample_size, 0);
        assert_eq!(baseline.mean_price, 0.0);
    }
}
