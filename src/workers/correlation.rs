// =============================================================================
// Correlation Analyzer (spec §4.7)
// =============================================================================
//
// Computes pairwise Pearson correlation of daily closes between every pair of
// currently-active symbols, and persists the result canonically ordered
// (`stock_a < stock_b`) via `StockCorrelation::new_canonical`.
//
// Grounded on the teacher's periodic-worker shape, same as `workers/regime.rs`
// and `workers/baseline.rs`; Pearson correlation itself has no teacher
// analog and is implemented directly from its standard definition.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::repository::{Repository, StockCorrelation};
use crate::types::Timeframe;

const LOOKBACK_DAYS: u32 = 30;
const MIN_SAMPLES: usize = 10;

pub struct CorrelationAnalyzer {
    repo: Arc<dyn Repository>,
}

impl CorrelationAnalyzer {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh_all().await {
                    warn!(error = %e, "correlation refresh failed");
                }
            }
        });
    }

    pub async fn refresh_all(&self) -> anyhow::Result<()> {
        let since = chrono::Utc::now() - chrono::Duration::days(LOOKBACK_DAYS as i64);
        let symbols = self.repo.get_active_symbols(since).await?;

        let mut closes_by_symbol = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            let candles = self
                .repo
                .get_candles_by_timeframe(Timeframe::D1, symbol, LOOKBACK_DAYS)
                .await?;
            let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
            closes_by_symbol.push((symbol.clone(), closes));
        }

        for i in 0..closes_by_symbol.len() {
            for j in (i + 1)..closes_by_symbol.len() {
                let (a, closes_a) = &closes_by_symbol[i];
                let (b, closes_b) = &closes_by_symbol[j];
                if let Some(coefficient) = pearson_correlation(closes_a, closes_b) {
                    let corr = StockCorrelation::new_canonical(
                        a,
                        b,
                        chrono::Utc::now(),
                        coefficient,
                        LOOKBACK_DAYS,
                        "daily",
                    );
                    debug!(a = %a, b = %b, coefficient, "correlation computed");
                    self.repo.save_stock_correlation(&corr).await?;
                }
            }
        }

        Ok(())
    }
}

/// Pearson product-moment correlation over the overlapping tail of both
/// series. Returns `None` below `MIN_SAMPLES` or when either series has zero
/// variance.
fn pearson_correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < MIN_SAMPLES {
        return None;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }

    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}
