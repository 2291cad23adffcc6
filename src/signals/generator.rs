// =============================================================================
// Signal Generator (spec §4.8)
// =============================================================================
//
// Ties the Scorecard and Filter Pipeline together: a candidate direction is
// scored, gated on `min_score_for_signal`, run through the five filter
// stages, and — if it survives — persisted with its outcome row, published
// on the `signal` broker/cache topic, and guarded behind per-symbol/strategy
// KV cooldown and duplicate-suppression keys.
//
// Grounded on the teacher's `signals/mod.rs` orchestration shape (gather
// inputs, score, decide, emit) generalized from the teacher's single
// weighted-sum gate to the spec's scorecard-then-pipeline two-stage gate.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::broker::Broker;
use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::indicators::vwap::calculate_vwap;
use crate::repository::{Repository, SignalOutcome, TradingSignal};
use crate::types::{Action, Decision, OutcomeStatus, Timeframe};

use super::filters::confidence::DEFAULT_CONFIDENCE_THRESHOLD;
use super::filters::{run_pipeline, FilterContext};
use super::scorecard::{score, ScorecardInput};

const STRATEGY_COOLDOWN: Duration = Duration::from_secs(15 * 60);
const RECENT_TTL: Duration = Duration::from_secs(5 * 60);
const SAVED_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const CONFIDENCE_THRESHOLD_CACHE_KEY: &str = "signal:confidence_thresholds";
const CONFIDENCE_THRESHOLD_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
const CONFIDENCE_THRESHOLD_LOOKBACK_DAYS: u32 = 30;
const WHALE_LOOKBACK_MINUTES: i64 = 15;
const VWAP_CANDLE_LOOKBACK: u32 = 78; // ~1 trading session of M5 bars
const CONSECUTIVE_LOSS_LOOKBACK_HOURS: i64 = 24;

pub struct SignalGenerator {
    repo: Arc<dyn Repository>,
    cache: Arc<dyn Cache>,
    broker: Broker,
    config: Arc<EngineConfig>,
}

pub struct SignalCandidate<'a> {
    pub symbol: &'a str,
    pub strategy: &'a str,
    pub decision: Decision,
    pub trigger_price: f64,
    pub trigger_volume_lots: f64,
    pub price_z: f64,
    pub volume_z: f64,
}

impl SignalGenerator {
    pub fn new(
        repo: Arc<dyn Repository>,
        cache: Arc<dyn Cache>,
        broker: Broker,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            repo,
            cache,
            broker,
            config,
        }
    }

    /// Evaluate one candidate end-to-end. Returns the persisted signal id
    /// when a signal was actually raised.
    pub async fn evaluate(&self, candidate: SignalCandidate<'_>) -> anyhow::Result<Option<i64>> {
        let cooldown_key = format!("signal:cooldown:{}:{}", candidate.symbol, candidate.strategy);
        if self.cache.exists(&cooldown_key).await {
            debug!(symbol = candidate.symbol, "signal suppressed by cooldown");
            return Ok(None);
        }

        if self
            .is_duplicate_signal(candidate.symbol, candidate.strategy)
            .await?
        {
            debug!(symbol = candidate.symbol, "signal suppressed as duplicate");
            return Ok(None);
        }

        let regime = self.repo.get_latest_regime(candidate.symbol).await?;
        let baseline = self.repo.get_latest_baseline(candidate.symbol).await?;
        let order_flow = self.repo.get_latest_order_flow(candidate.symbol).await?;
        let recent_patterns = self.repo.get_recent_patterns(candidate.symbol, 1).await?;
        let recent_pattern = recent_patterns.first();

        let scorecard_input = ScorecardInput {
            decision: candidate.decision,
            price_z: candidate.price_z,
            volume_z: candidate.volume_z,
            regime: regime.as_ref(),
            order_flow: order_flow.as_ref(),
            recent_pattern,
        };
        let scorecard = score(&scorecard_input);
        let total = scorecard.total();

        if (total as u32) < self.config.min_score_for_signal {
            debug!(symbol = candidate.symbol, total, "scorecard below threshold");
            return Ok(None);
        }

        let daily_perf = self
            .repo
            .get_daily_strategy_performance(candidate.strategy, None, 30)
            .await?;
        let strategy_sample_size: u32 = daily_perf.iter().map(|p| p.total_signals).sum();
        let strategy_wins: u32 = daily_perf.iter().map(|p| p.wins).sum();
        let strategy_win_rate = if strategy_sample_size > 0 {
            Some(strategy_wins as f64 / strategy_sample_size as f64)
        } else {
            None
        };

        let consecutive_losses = self
            .consecutive_losses(candidate.symbol, candidate.strategy)
            .await?;
        let (whale_buy_count, whale_sell_count, whale_buy_value) =
            self.whale_summary(candidate.symbol).await?;
        let vwap = self.vwap(candidate.symbol).await?;
        let resolved_confidence_threshold = self
            .resolved_confidence_threshold(candidate.strategy)
            .await;

        let candidate_confidence = (total / 100.0).clamp(0.0, 1.0);

        let filter_ctx = FilterContext {
            symbol: candidate.symbol,
            decision: candidate.decision,
            regime: regime.as_ref(),
            baseline: baseline.as_ref(),
            order_flow: order_flow.as_ref(),
            strategy_win_rate,
            strategy_sample_size,
            consecutive_losses,
            volume_z: candidate.volume_z,
            confidence: candidate_confidence,
            price: candidate.trigger_price,
            vwap,
            resolved_confidence_threshold,
            whale_buy_count,
            whale_sell_count,
            whale_buy_value,
            now: Utc::now(),
            config: &self.config,
        };

        let multiplier = match run_pipeline(&filter_ctx) {
            Ok(m) => m,
            Err(reason) => {
                debug!(symbol = candidate.symbol, reason = %reason, "signal rejected by filter pipeline");
                return Ok(None);
            }
        };

        let confidence = (candidate_confidence * multiplier).clamp(0.0, 1.0);

        let signal = TradingSignal {
            id: 0,
            generated_at: chrono::Utc::now(),
            symbol: candidate.symbol.to_string(),
            strategy: candidate.strategy.to_string(),
            decision: candidate.decision,
            confidence,
            trigger_price: candidate.trigger_price,
            trigger_volume_lots: candidate.trigger_volume_lots,
            price_z: candidate.price_z,
            volume_z: candidate.volume_z,
            reason: format!(
                "scorecard={total:.1} filter_multiplier={multiplier:.2} price_z={:.2} volume_z={:.2}",
                candidate.price_z, candidate.volume_z
            ),
            analysis_json: serde_json::to_string(&scorecard_json(&scorecard)).unwrap_or_default(),
            regime_at_generation: regime.as_ref().map(|r| r.regime.to_string()),
        };

        let outcome = SignalOutcome {
            signal_id: 0,
            symbol: signal.symbol.clone(),
            entry_time: signal.generated_at,
            entry_price: signal.trigger_price,
            entry_decision: signal.decision,
            status: OutcomeStatus::Open,
            exit_time: None,
            exit_price: None,
            exit_reason: None,
            profit_loss_pct: None,
            holding_minutes: None,
            mae: None,
            mfe: None,
            risk_reward: None,
            trailing_stop_price: None,
        };

        let id = self.repo.save_trading_signal_with_outcome(&signal, &outcome).await?;

        self.cache.set_raw(&cooldown_key, "1".to_string(), STRATEGY_COOLDOWN).await;
        self.cache
            .set_raw(
                &format!("signal:recent:{}", candidate.symbol),
                "1".to_string(),
                RECENT_TTL,
            )
            .await;
        self.cache
            .set_raw(
                &saved_key(candidate.symbol, candidate.strategy, signal.generated_at),
                "1".to_string(),
                SAVED_TTL,
            )
            .await;

        let payload = serde_json::to_string(&signal).unwrap_or_default();
        self.broker.publish("signal", payload.clone()).await;
        self.cache.publish("signal", payload).await;

        info!(
            symbol = %signal.symbol,
            decision = %signal.decision,
            confidence = signal.confidence,
            "signal generated"
        );

        Ok(Some(id))
    }

    /// Batch-lookup `signal:saved:*` for this candidate before scoring.
    /// Falls back to a repository existence check over the same window since
    /// the in-process cache loses its `signal:saved:*` markers across a
    /// restart.
    async fn is_duplicate_signal(&self, symbol: &str, strategy: &str) -> anyhow::Result<bool> {
        let now = Utc::now();
        let keys = vec![
            saved_key(symbol, strategy, now),
            saved_key(symbol, strategy, now - chrono::Duration::seconds(1)),
        ];
        if self.cache.mget_raw(&keys).await.iter().any(Option::is_some) {
            return Ok(true);
        }

        let window_start = now - chrono::Duration::seconds(1);
        let existing = self
            .repo
            .get_trading_signals(Some(symbol), Some(strategy), None, window_start, now, 1)
            .await?;
        Ok(!existing.is_empty())
    }

    /// Count of consecutive LOSS outcomes for this (symbol, strategy) over
    /// the last 24h, most recent first, broken by the first intervening WIN.
    async fn consecutive_losses(&self, symbol: &str, strategy: &str) -> anyhow::Result<u32> {
        let end = Utc::now();
        let start = end - chrono::Duration::hours(CONSECUTIVE_LOSS_LOOKBACK_HOURS);
        let signals = self
            .repo
            .get_trading_signals(Some(symbol), Some(strategy), None, start, end, 50)
            .await?;

        let mut count = 0;
        for s in signals {
            match self.repo.get_signal_outcome_by_signal_id(s.id).await? {
                Some(o) if o.status == OutcomeStatus::Loss => count += 1,
                Some(o) if o.status == OutcomeStatus::Win => break,
                _ => continue,
            }
        }
        Ok(count)
    }

    /// Buy/sell whale alert counts and total buy-side value over the last
    /// 15 minutes, for the order-flow filter's whale cross-check.
    async fn whale_summary(&self, symbol: &str) -> anyhow::Result<(u32, u32, f64)> {
        let end = Utc::now();
        let start = end - chrono::Duration::minutes(WHALE_LOOKBACK_MINUTES);
        let whales = self
            .repo
            .get_historical_whales(Some(symbol), start, end, None, None, 200, 0)
            .await?;

        let mut buy_count = 0;
        let mut sell_count = 0;
        let mut buy_value = 0.0;
        for w in whales {
            match w.action {
                Action::Buy => {
                    buy_count += 1;
                    buy_value += w.trigger_value;
                }
                Action::Sell => sell_count += 1,
            }
        }
        Ok((buy_count, sell_count, buy_value))
    }

    async fn vwap(&self, symbol: &str) -> anyhow::Result<Option<f64>> {
        let candles = self
            .repo
            .get_candles_by_timeframe(Timeframe::M5, symbol, VWAP_CANDLE_LOOKBACK)
            .await?;
        Ok(calculate_vwap(&candles))
    }

    /// Per-strategy confidence threshold, resolved from historical outcomes
    /// and cached for 10 minutes to avoid recomputing it on every candidate.
    async fn resolved_confidence_threshold(&self, strategy: &str) -> f64 {
        let thresholds = match self.cache.get_raw(CONFIDENCE_THRESHOLD_CACHE_KEY).await {
            Some(raw) => serde_json::from_str::<Vec<(String, f64)>>(&raw).unwrap_or_default(),
            None => {
                let fetched = self
                    .repo
                    .get_optimal_confidence_thresholds(CONFIDENCE_THRESHOLD_LOOKBACK_DAYS)
                    .await
                    .unwrap_or_default();
                if let Ok(json) = serde_json::to_string(&fetched) {
                    self.cache
                        .set_raw(
                            CONFIDENCE_THRESHOLD_CACHE_KEY,
                            json,
                            CONFIDENCE_THRESHOLD_CACHE_TTL,
                        )
                        .await;
                }
                fetched
            }
        };

        thresholds
            .into_iter()
            .find(|(s, _)| s == strategy)
            .map(|(_, t)| t)
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

fn saved_key(symbol: &str, strategy: &str, at: DateTime<Utc>) -> String {
    format!("signal:saved:{}:{}:{}", symbol, strategy, at.timestamp())
}

fn scorecard_json(s: &super::scorecard::ScorecardResult) -> serde_json::Value {
    serde_json::json!({
        "trigger_score": s.trigger_score,
        "regime_score": s.regime_score,
        "order_flow_score": s.order_flow_score,
        "pattern_score": s.pattern_score,
        "total": s.total(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::repository::sqlite::SqliteRepository;

    async fn generator() -> SignalGenerator {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let broker = Broker::spawn();
        let config = Arc::new(EngineConfig::default());
        SignalGenerator::new(repo, cache, broker, config)
    }

    #[tokio::test]
    async fn weak_trigger_scores_below_threshold_and_raises_nothing() {
        let gen = generator().await;
        let candidate = SignalCandidate {
            symbol: "BBCA",
            strategy: "momentum",
            decision: Decision::Buy,
            trigger_price: 1000.0,
            trigger_volume_lots: 10.0,
            price_z: 0.1,
            volume_z: 0.1,
        };
        let result = gen.evaluate(candidate).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn strong_trigger_with_no_order_flow_is_rejected_by_pipeline() {
        let gen = generator().await;
        let candidate = SignalCandidate {
            symbol: "BBCA",
            strategy: "momentum",
            decision: Decision::Buy,
            trigger_price: 1000.0,
            trigger_volume_lots: 10.0,
            price_z: 5.0,
            volume_z: 5.0,
        };
        // `require_order_flow` defaults true and no order-flow row exists in
        // the fresh repository, so the order_flow filter stage rejects.
        let result = gen.evaluate(candidate).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn cooldown_key_blocks_immediate_repeat() {
        let gen = generator().await;
        gen.cache
            .set_raw("signal:cooldown:BBCA:momentum", "1".to_string(), STRATEGY_COOLDOWN)
            .await;
        let candidate = SignalCandidate {
            symbol: "BBCA",
            strategy: "momentum",
            decision: Decision::Buy,
            trigger_price: 1000.0,
            trigger_volume_lots: 10.0,
            price_z: 5.0,
            volume_z: 5.0,
        };
        let result = gen.evaluate(candidate).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn duplicate_saved_key_blocks_repeat_within_the_same_second() {
        let gen = generator().await;
        let now = Utc::now();
        gen.cache
            .set_raw(&saved_key("BBCA", "momentum", now), "1".to_string(), SAVED_TTL)
            .await;
        let candidate = SignalCandidate {
            symbol: "BBCA",
            strategy: "momentum",
            decision: Decision::Buy,
            trigger_price: 1000.0,
            trigger_volume_lots: 10.0,
            price_z: 5.0,
            volume_z: 5.0,
        };
        let result = gen.evaluate(candidate).await.unwrap();
        assert!(result.is_none());
    }
}
