// =============================================================================
// Ingest Handler (spec §4.2)
// =============================================================================
//
// Consumes decoded trades from the Feed Client and, for each one: persists
// the row, folds it into the rolling 60 s window and the 1-minute candle
// bucket, and evaluates the whale-alert thresholds against the symbol's
// latest statistical baseline. A detected whale alert is persisted,
// broadcast on the `alert` topic, and queued for webhook delivery.
//
// Grounded on the teacher's `TradeStreamProcessor::process_trade` (single
// entry point folding one trade into running aggregates) generalized from
// Binance's buy/sell-volume-ratio bookkeeping to the spec's whale-detection
// and candle-bucketing responsibilities. Owns `RollingWindowArena` and
// `CandleBuffer` exclusively, per spec §5's single-writer policy.
// =============================================================================

pub mod candle_buffer;
pub mod rolling_window;

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::repository::{Candle, Repository, Trade, WhaleAlert};
use crate::signals::{SignalCandidate, SignalGenerator};
use crate::types::{Action, Decision, Timeframe};
use crate::webhook::WebhookDispatcher;

use candle_buffer::{CandleBuffer, CandleKey};
use rolling_window::RollingWindowArena;

/// Strategy trigger thresholds (spec §4.2 step 2 / §4.8). A trade is only
/// worth scoring as a candidate once it moves far enough from the symbol's
/// own baseline to be interesting.
const VOLUME_BREAKOUT_Z: f64 = 2.0;
const MEAN_REVERSION_Z: f64 = 2.0;

pub struct IngestHandler {
    repo: Arc<dyn Repository>,
    cache: Arc<dyn Cache>,
    broker: Broker,
    webhooks: WebhookDispatcher,
    config: Arc<EngineConfig>,
    windows: RollingWindowArena,
    candles: CandleBuffer,
    generator: Arc<SignalGenerator>,
}

impl IngestHandler {
    pub fn new(
        repo: Arc<dyn Repository>,
        cache: Arc<dyn Cache>,
        broker: Broker,
        webhooks: WebhookDispatcher,
        config: Arc<EngineConfig>,
        generator: Arc<SignalGenerator>,
    ) -> Self {
        Self {
            repo,
            cache,
            broker,
            webhooks,
            config,
            windows: RollingWindowArena::new(),
            candles: CandleBuffer::new(1_500),
            generator,
        }
    }

    pub fn windows(&self) -> &RollingWindowArena {
        &self.windows
    }

    pub fn candles(&self) -> &CandleBuffer {
        &self.candles
    }

    /// Process one incoming trade end-to-end (spec §4.2 steps 1-5).
    pub async fn handle_trade(&self, trade: Trade) -> anyhow::Result<()> {
        // Step 1: persist (idempotent on (symbol, seq), per invariant 1).
        self.repo.save_trade(&trade).await?;

        // Step 2: fold into the rolling 60 s aggregate window.
        self.windows.record(trade.clone());

        // Step 3: fold into the 1-minute candle bucket.
        self.update_minute_candle(&trade).await?;

        // Step 4 + 5: evaluate whale thresholds and raise an alert if tripped.
        if let Some(alert) = self.evaluate_whale_threshold(&trade).await? {
            self.raise_whale_alert(alert).await?;
        }

        // Strategy triggers feed the Signal Generator directly (spec §4.8:
        // "Inputs: strategy triggers produced by the Ingest Handler").
        for candidate in self.strategy_triggers(&trade).await? {
            if let Err(e) = self.generator.evaluate(candidate).await {
                warn!(symbol = %trade.symbol, error = %e, "signal evaluation failed");
            }
        }

        Ok(())
    }

    /// Detect volume-breakout and mean-reversion triggers against the
    /// symbol's latest statistical baseline.
    async fn strategy_triggers(&self, trade: &Trade) -> anyhow::Result<Vec<SignalCandidate<'_>>> {
        let baseline = match self.repo.get_latest_baseline(&trade.symbol).await? {
            Some(b) => b,
            None => return Ok(Vec::new()),
        };

        let price_z = if baseline.stddev_price > 0.0 {
            (trade.price - baseline.mean_price) / baseline.stddev_price
        } else {
            0.0
        };
        let volume_z = if baseline.stddev_volume > 0.0 {
            (trade.volume_lots - baseline.mean_volume) / baseline.stddev_volume
        } else {
            0.0
        };

        let mut candidates = Vec::new();

        if volume_z.abs() >= VOLUME_BREAKOUT_Z {
            let decision = match trade.action {
                Action::Buy => Decision::Buy,
                Action::Sell => Decision::Sell,
            };
            candidates.push(SignalCandidate {
                symbol: &trade.symbol,
                strategy: "volume_breakout",
                decision,
                trigger_price: trade.price,
                trigger_volume_lots: trade.volume_lots,
                price_z,
                volume_z,
            });
        }

        if price_z.abs() >= MEAN_REVERSION_Z {
            // A large deviation from the mean is faded, not chased.
            let decision = if price_z > 0.0 { Decision::Sell } else { Decision::Buy };
            candidates.push(SignalCandidate {
                symbol: &trade.symbol,
                strategy: "mean_reversion",
                decision,
                trigger_price: trade.price,
                trigger_volume_lots: trade.volume_lots,
                price_z,
                volume_z,
            });
        }

        Ok(candidates)
    }

    async fn update_minute_candle(&self, trade: &Trade) -> anyhow::Result<()> {
        let bucket_start = truncate_to_minute(trade.detected_at);
        let bucket_end = bucket_start + ChronoDuration::minutes(1);
        let key = CandleKey {
            symbol: trade.symbol.clone(),
            timeframe: Timeframe::M1,
        };

        let existing = self.repo.get_latest_candle(&trade.symbol, Timeframe::M1).await?;
        let in_progress = existing.filter(|c| !c.is_closed && c.open_time == bucket_start);

        let updated = match in_progress {
            Some(mut candle) => {
                candle.high = candle.high.max(trade.price);
                candle.low = candle.low.min(trade.price);
                candle.close = trade.price;
                candle.volume_lots += trade.volume_lots;
                candle.is_closed = Utc::now() >= bucket_end;
                candle
            }
            None => Candle {
                open_time: bucket_start,
                close_time: bucket_end,
                open: trade.price,
                high: trade.price,
                low: trade.price,
                close: trade.price,
                volume_lots: trade.volume_lots,
                is_closed: Utc::now() >= bucket_end,
            },
        };

        self.candles.update(key, updated);
        self.repo.save_candle(&trade.symbol, Timeframe::M1, &updated).await?;
        Ok(())
    }

    /// Spec §4.2 step 4: compare the trade's value and z-score against the
    /// symbol's latest statistical baseline; returns a candidate alert if
    /// either threshold is tripped.
    async fn evaluate_whale_threshold(&self, trade: &Trade) -> anyhow::Result<Option<WhaleAlert>> {
        let baseline = self.repo.get_latest_baseline(&trade.symbol).await?;

        let value_tripped = trade.total_value >= self.config.whale_value_threshold;

        let z_score = baseline.as_ref().and_then(|b| {
            if b.stddev_value > 0.0 {
                Some((trade.total_value - b.mean_value) / b.stddev_value)
            } else {
                None
            }
        });
        let zscore_tripped = z_score
            .map(|z| z.abs() >= self.config.whale_zscore_threshold)
            .unwrap_or(false);

        if !value_tripped && !zscore_tripped {
            return Ok(None);
        }

        debug!(
            symbol = %trade.symbol,
            value = trade.total_value,
            z_score = ?z_score,
            "whale threshold tripped"
        );

        Ok(Some(WhaleAlert {
            id: 0,
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            detected_at: trade.detected_at,
            trigger_value: trade.total_value,
            trigger_price: trade.price,
            trigger_volume_lots: trade.volume_lots,
            z_score,
            action: trade.action,
        }))
    }

    async fn raise_whale_alert(&self, mut alert: WhaleAlert) -> anyhow::Result<()> {
        let id = self.repo.save_whale_alert(&alert).await?;
        alert.id = id;

        let payload = serde_json::to_string(&alert).unwrap_or_default();
        self.broker.publish("alert", payload.clone()).await;
        self.cache.publish("alert", payload).await;
        self.webhooks.enqueue(&alert).await;

        info!(
            symbol = %alert.symbol,
            value = alert.trigger_value,
            action = %alert.action,
            "whale alert raised"
        );
        Ok(())
    }

    /// Periodic upkeep: drop idle per-symbol state (spec §3's 2 h eviction).
    pub fn evict_idle(&self) {
        self.windows.evict_idle();
        self.candles.evict_idle(ChronoDuration::hours(2));
    }
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp() - ts.second() as i64, 0)
        .single()
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::repository::sqlite::SqliteRepository;
    use crate::types::Board;
    use reqwest::Client;

    fn sample_trade(symbol: &str, price: f64, lots: f64, seq: u64) -> Trade {
        Trade {
            id: 0,
            detected_at: Utc::now(),
            symbol: symbol.to_string(),
            price,
            volume_lots: lots,
            total_value: price * lots * 100.0,
            action: Action::Buy,
            board: Board::Rg,
            seq,
        }
    }

    async fn handler() -> IngestHandler {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let broker = Broker::spawn();
        let webhooks = WebhookDispatcher::spawn(Client::new());
        let config = Arc::new(EngineConfig::default());
        let generator = Arc::new(SignalGenerator::new(
            repo.clone(),
            cache.clone(),
            broker.clone(),
            config.clone(),
        ));
        IngestHandler::new(repo, cache, broker, webhooks, config, generator)
    }

    #[tokio::test]
    async fn trade_below_threshold_raises_no_alert() {
        let handler = handler().await;
        let trade = sample_trade("BBCA", 1000.0, 1.0, 1);
        handler.handle_trade(trade).await.unwrap();
        assert_eq!(handler.windows().aggregate("BBCA").unwrap().trade_count, 1);
    }

    #[tokio::test]
    async fn trade_above_value_threshold_raises_alert() {
        let handler = handler().await;
        // 10_000 * 600 * 100 = 6e8, above the default 5e8 threshold.
        let trade = sample_trade("BBCA", 10_000.0, 600.0, 1);
        handler.handle_trade(trade).await.unwrap();

        let recent = handler.windows().recent_trades("BBCA", 10);
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn minute_candle_accumulates_high_low_close() {
        let handler = handler().await;
        handler.handle_trade(sample_trade("TLKM", 100.0, 1.0, 1)).await.unwrap();
        handler.handle_trade(sample_trade("TLKM", 105.0, 1.0, 2)).await.unwrap();
        handler.handle_trade(sample_trade("TLKM", 98.0, 1.0, 3)).await.unwrap();

        let key = CandleKey {
            symbol: "TLKM".to_string(),
            timeframe: Timeframe::M1,
        };
        assert_eq!(handler.candles().count(&key), 1);
    }
}
