// =============================================================================
// Performance Refresher (spec §4.13)
// =============================================================================
//
// Periodically recomputes each strategy's `DailyStrategyPerformance`
// aggregate — signal counts, win/loss/breakeven tallies, win rate, and mean
// P&L — from the day's closed signal outcomes, then upserts it.
//
// Grounded on the teacher's reconciliation-loop shape (`reconcile.rs` /
// `main.rs`'s fixed-cadence background sync): both periodically rebuild a
// derived aggregate from raw ledger rows rather than maintaining it
// incrementally.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::repository::{DailyStrategyPerformance, Repository, SignalOutcome};
use crate::types::OutcomeStatus;

const SIGNALS_PAGE_LIMIT: u32 = 10_000;

pub struct PerformanceRefresher {
    repo: Arc<dyn Repository>,
}

impl PerformanceRefresher {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let today = day_bucket(Utc::now());
                if let Err(e) = self.refresh_day(today).await {
                    warn!(error = %e, "performance refresh failed");
                }
            }
        });
    }

    pub async fn refresh_day(&self, day: DateTime<Utc>) -> anyhow::Result<()> {
        let day_start = day;
        let day_end = day_start + chrono::Duration::days(1);

        let signals = self
            .repo
            .get_trading_signals(None, None, None, day_start, day_end, SIGNALS_PAGE_LIMIT)
            .await?;

        let mut by_strategy: HashMap<String, Vec<SignalOutcome>> = HashMap::new();
        for signal in &signals {
            if let Some(outcome) = self.repo.get_signal_outcome_by_signal_id(signal.id).await? {
                by_strategy.entry(signal.strategy.clone()).or_default().push(outcome);
            }
        }

        for (strategy, outcomes) in by_strategy {
            let perf = aggregate(&strategy, day_start, &outcomes);
            debug!(strategy = %perf.strategy, total = perf.total_signals, win_rate = perf.win_rate, "performance refreshed");
            self.repo.upsert_daily_strategy_performance(&perf).await?;
        }

        Ok(())
    }
}

fn day_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp() - ts.timestamp() % 86_400, 0)
        .single()
        .unwrap_or(ts)
}

fn aggregate(strategy: &str, day: DateTime<Utc>, outcomes: &[SignalOutcome]) -> DailyStrategyPerformance {
    let closed: Vec<&SignalOutcome> = outcomes
        .iter()
        .filter(|o| o.status != OutcomeStatus::Open)
        .collect();

    let wins = closed.iter().filter(|o| o.status == OutcomeStatus::Win).count() as u32;
    let losses = closed.iter().filter(|o| o.status == OutcomeStatus::Loss).count() as u32;
    let breakevens = closed
        .iter()
        .filter(|o| o.status == OutcomeStatus::Breakeven)
        .count() as u32;

    let total_closed = closed.len() as u32;
    let win_rate = if total_closed > 0 {
        wins as f64 / total_closed as f64
    } else {
        0.0
    };

    let pnl_values: Vec<f64> = closed.iter().filter_map(|o| o.profit_loss_pct).collect();
    let avg_profit_loss_pct = if pnl_values.is_empty() {
        0.0
    } else {
        pnl_values.iter().sum::<f64>() / pnl_values.len() as f64
    };

    DailyStrategyPerformance {
        strategy: strategy.to_string(),
        symbol: None,
        day,
        total_signals: outcomes.len() as u32,
        wins,
        losses,
        breakevens,
        win_rate,
        avg_profit_loss_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Decision;

    fn outcome(status: OutcomeStatus, pnl: Option<f64>) -> SignalOutcome {
        SignalOutcome {
            signal_id: 1,
            symbol: "BBCA".to_string(),
            entry_time: Utc::now(),
            entry_price: 1000.0,
            entry_decision: Decision::Buy,
            status,
            exit_time: None,
            exit_price: None,
            exit_reason: None,
            profit_loss_pct: pnl,
            holding_minutes: None,
            mae: None,
            mfe: None,
            risk_reward: None,
            trailing_stop_price: None,
        }
    }

    #[test]
    fn aggregate_counts_wins_losses_breakevens() {
        let outcomes = vec![
            outcome(OutcomeStatus::Win, Some(1.2)),
            outcome(OutcomeStatus::Win, Some(0.8)),
            outcome(OutcomeStatus::Loss, Some(-0.6)),
            outcome(OutcomeStatus::Breakeven, Some(0.0)),
            outcome(OutcomeStatus::Open, None),
        ];
        let perf = aggregate("momentum", Utc::now(), &outcomes);
        assert_eq!(perf.total_signals, 5);
        assert_eq!(perf.wins, 2);
        assert_eq!(perf.losses, 1);
        assert_eq!(perf.breakevens, 1);
        assert!((perf.win_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn aggregate_with_no_closed_outcomes_has_zero_win_rate() {
        let outcomes = vec![outcome(OutcomeStatus::Open, None)];
        let perf = aggregate("momentum", Utc::now(), &outcomes);
        assert_eq!(perf.win_rate, 0.0);
        assert_eq!(perf.avg_profit_loss_pct, 0.0);
    }

    #[test]
    fn day_bucket_truncates_to_midnight_utc() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 28, 13, 45, 10).unwrap();
        let bucket = day_bucket(ts);
        assert_eq!(bucket.timestamp() % 86_400, 0);
    }
}
