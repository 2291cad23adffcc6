// =============================================================================
// Repository contract (spec §6.3) — typed facade over persistent storage
// =============================================================================
//
// The repository is an external collaborator: the core only depends on this
// trait's surface. `sqlite.rs` provides the concrete, in-crate implementation
// (grounded on `cooprefr-bettersys`'s use of bundled rusqlite, the pack's only
// embedded-SQL example) so the engine runs standalone without an external
// database process.
// =============================================================================

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    Action, Board, Decision, ExitReason, ImpactClass, OutcomeStatus, PatternDirection,
    PatternOutcome, PatternType, RegimeKind, Timeframe,
};

// =============================================================================
// Entities (spec §3)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub detected_at: DateTime<Utc>,
    pub symbol: String,
    pub price: f64,
    pub volume_lots: f64,
    pub total_value: f64,
    pub action: Action,
    pub board: Board,
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleAlert {
    pub id: i64,
    pub trade_id: i64,
    pub symbol: String,
    pub detected_at: DateTime<Utc>,
    pub trigger_value: f64,
    pub trigger_price: f64,
    pub trigger_volume_lots: f64,
    pub z_score: Option<f64>,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalBaseline {
    pub symbol: String,
    pub calculated_at: DateTime<Utc>,
    pub mean_price: f64,
    pub stddev_price: f64,
    pub median_price: f64,
    pub p25_price: f64,
    pub p75_price: f64,
    pub mean_volume: f64,
    pub stddev_volume: f64,
    pub mean_value: f64,
    pub stddev_value: f64,
    pub sample_size: u32,
    pub lookback_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRegime {
    pub symbol: String,
    pub calculated_at: DateTime<Utc>,
    pub regime: RegimeKind,
    pub confidence: f64,
    pub volatility: Option<f64>,
    pub bollinger_width: Option<f64>,
    pub atr: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub id: i64,
    pub symbol: String,
    pub detected_at: DateTime<Utc>,
    pub pattern_type: PatternType,
    pub direction: Option<PatternDirection>,
    pub confidence: f64,
    pub breakout_level: f64,
    pub outcome: PatternOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFlowImbalance {
    pub symbol: String,
    pub window_end: DateTime<Utc>,
    pub buy_volume_lots: f64,
    pub sell_volume_lots: f64,
    pub aggressive_buy_pct: Option<f64>,
    pub window_secs: u64,
}

impl OrderFlowImbalance {
    pub fn buy_pct(&self) -> f64 {
        let total = self.buy_volume_lots + self.sell_volume_lots;
        if total <= 0.0 {
            0.0
        } else {
            self.buy_volume_lots / total
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_lots: f64,
    pub is_closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: i64,
    pub generated_at: DateTime<Utc>,
    pub symbol: String,
    pub strategy: String,
    pub decision: Decision,
    pub confidence: f64,
    pub trigger_price: f64,
    pub trigger_volume_lots: f64,
    pub price_z: f64,
    pub volume_z: f64,
    pub reason: String,
    pub analysis_json: String,
    pub regime_at_generation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalOutcome {
    pub signal_id: i64,
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub entry_decision: Decision,
    pub status: OutcomeStatus,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub profit_loss_pct: Option<f64>,
    pub holding_minutes: Option<i64>,
    pub mae: Option<f64>,
    pub mfe: Option<f64>,
    pub risk_reward: Option<f64>,
    pub trailing_stop_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleAlertFollowup {
    pub alert_id: i64,
    pub symbol: String,
    pub alert_time: DateTime<Utc>,
    pub alert_price: f64,
    pub alert_action: Action,
    pub price_1min: Option<f64>,
    pub price_5min: Option<f64>,
    pub price_15min: Option<f64>,
    pub price_30min: Option<f64>,
    pub price_60min: Option<f64>,
    pub price_1day: Option<f64>,
    pub change_1min_pct: Option<f64>,
    pub change_5min_pct: Option<f64>,
    pub change_15min_pct: Option<f64>,
    pub change_30min_pct: Option<f64>,
    pub change_60min_pct: Option<f64>,
    pub change_1day_pct: Option<f64>,
    pub immediate_impact: Option<ImpactClass>,
    pub sustained_impact: Option<ImpactClass>,
    pub reversal_detected: bool,
    pub reversal_time_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockCorrelation {
    pub stock_a: String,
    pub stock_b: String,
    pub calculated_at: DateTime<Utc>,
    pub coefficient: f64,
    pub lookback_days: u32,
    pub period: String,
}

impl StockCorrelation {
    /// Enforce the canonical ordering invariant `stock_a < stock_b`.
    pub fn new_canonical(
        a: &str,
        b: &str,
        calculated_at: DateTime<Utc>,
        coefficient: f64,
        lookback_days: u32,
        period: &str,
    ) -> Self {
        let (stock_a, stock_b) = if a < b { (a, b) } else { (b, a) };
        Self {
            stock_a: stock_a.to_string(),
            stock_b: stock_b.to_string(),
            calculated_at,
            coefficient,
            lookback_days,
            period: period.to_string(),
        }
    }
}

/// Per-strategy daily performance aggregate (§4.13 / §6.3 effectiveness
/// queries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStrategyPerformance {
    pub strategy: String,
    pub symbol: Option<String>,
    pub day: DateTime<Utc>,
    pub total_signals: u32,
    pub wins: u32,
    pub losses: u32,
    pub breakevens: u32,
    pub win_rate: f64,
    pub avg_profit_loss_pct: f64,
}

// =============================================================================
// Repository trait (spec §6.3)
// =============================================================================

#[async_trait]
pub trait Repository: Send + Sync {
    // --- Trades / Candles ----------------------------------------------------
    async fn save_trade(&self, trade: &Trade) -> anyhow::Result<()>;
    async fn get_trades_by_time_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Trade>>;
    async fn get_latest_candle(
        &self,
        symbol: &str,
        tf: Timeframe,
    ) -> anyhow::Result<Option<Candle>>;
    async fn get_candles_by_timeframe(
        &self,
        tf: Timeframe,
        symbol: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<Candle>>;
    async fn save_candle(&self, symbol: &str, tf: Timeframe, candle: &Candle) -> anyhow::Result<()>;
    async fn get_recent_trades(
        &self,
        symbol: &str,
        limit: u32,
        action: Option<Action>,
    ) -> anyhow::Result<Vec<Trade>>;

    // --- Whale alerts ----------------------------------------------------------
    async fn save_whale_alert(&self, alert: &WhaleAlert) -> anyhow::Result<i64>;
    #[allow(clippy::too_many_arguments)]
    async fn get_historical_whales(
        &self,
        symbol: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        action: Option<Action>,
        min_value: Option<f64>,
        limit: u32,
        offset: u32,
    ) -> anyhow::Result<Vec<WhaleAlert>>;
    async fn get_whale_stats(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<(u32, f64)>;

    // --- Followups ---------------------------------------------------------
    async fn save_whale_followup(&self, followup: &WhaleAlertFollowup) -> anyhow::Result<()>;
    async fn get_whale_followup(
        &self,
        alert_id: i64,
    ) -> anyhow::Result<Option<WhaleAlertFollowup>>;
    async fn get_pending_followups(
        &self,
        window: std::time::Duration,
    ) -> anyhow::Result<Vec<WhaleAlertFollowup>>;
    async fn update_whale_followup(&self, followup: &WhaleAlertFollowup) -> anyhow::Result<()>;

    // --- Signals / Outcomes --------------------------------------------------
    async fn save_trading_signal_with_outcome(
        &self,
        signal: &TradingSignal,
        outcome: &SignalOutcome,
    ) -> anyhow::Result<i64>;
    async fn get_signal_by_id(&self, id: i64) -> anyhow::Result<Option<TradingSignal>>;
    #[allow(clippy::too_many_arguments)]
    async fn get_trading_signals(
        &self,
        symbol: Option<&str>,
        strategy: Option<&str>,
        decision: Option<Decision>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<TradingSignal>>;
    async fn get_open_signals(&self, limit: u32) -> anyhow::Result<Vec<TradingSignal>>;
    async fn update_signal_outcome(&self, outcome: &SignalOutcome) -> anyhow::Result<()>;
    async fn get_signal_outcome_by_signal_id(
        &self,
        signal_id: i64,
    ) -> anyhow::Result<Option<SignalOutcome>>;
    #[allow(clippy::too_many_arguments)]
    async fn get_signal_outcomes(
        &self,
        symbol: Option<&str>,
        status: Option<OutcomeStatus>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> anyhow::Result<Vec<SignalOutcome>>;
    async fn get_signal_performance_stats(
        &self,
        strategy: &str,
        symbol: Option<&str>,
    ) -> anyhow::Result<(u32, f64)>;

    // --- Baselines / Regimes / Patterns --------------------------------------
    /// Recompute a `StatisticalBaseline` per active symbol from raw trades
    /// over the last `hours`, keeping only symbols with at least `min_sample`
    /// trades in the window. Read-only: callers persist the result themselves
    /// via `batch_save_statistical_baselines`.
    async fn calculate_baselines_db(
        &self,
        hours: f64,
        min_sample: u32,
    ) -> anyhow::Result<Vec<StatisticalBaseline>>;
    async fn batch_save_statistical_baselines(
        &self,
        baselines: &[StatisticalBaseline],
    ) -> anyhow::Result<()>;
    async fn get_latest_baseline(
        &self,
        symbol: &str,
    ) -> anyhow::Result<Option<StatisticalBaseline>>;
    async fn save_market_regime(&self, regime: &MarketRegime) -> anyhow::Result<()>;
    async fn get_latest_regime(&self, symbol: &str) -> anyhow::Result<Option<MarketRegime>>;
    async fn save_detected_pattern(&self, pattern: &DetectedPattern) -> anyhow::Result<i64>;
    async fn get_recent_patterns(
        &self,
        symbol: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<DetectedPattern>>;

    // --- Order flow ----------------------------------------------------------
    async fn get_latest_order_flow(
        &self,
        symbol: &str,
    ) -> anyhow::Result<Option<OrderFlowImbalance>>;
    async fn save_order_flow_imbalance(&self, flow: &OrderFlowImbalance) -> anyhow::Result<()>;
    async fn get_order_flow_imbalance(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<OrderFlowImbalance>>;

    // --- Correlations --------------------------------------------------------
    async fn get_active_symbols(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<String>>;
    async fn save_stock_correlation(&self, corr: &StockCorrelation) -> anyhow::Result<()>;
    async fn get_stock_correlations(
        &self,
        symbol: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<StockCorrelation>>;

    // --- Effectiveness / performance -----------------------------------------
    async fn get_strategy_effectiveness_by_regime(
        &self,
        days: u32,
    ) -> anyhow::Result<Vec<(String, RegimeKind, f64)>>;
    async fn get_optimal_confidence_thresholds(
        &self,
        days: u32,
    ) -> anyhow::Result<Vec<(String, f64)>>;
    /// Average realized profit/loss percentage per strategy over the last
    /// `days`, across every closed (non-OPEN) outcome.
    async fn get_signal_expected_values(&self, days: u32) -> anyhow::Result<Vec<(String, f64)>>;
    async fn get_time_of_day_effectiveness(
        &self,
        days: u32,
    ) -> anyhow::Result<Vec<(u8, f64)>>;
    async fn get_daily_strategy_performance(
        &self,
        strategy: &str,
        symbol: Option<&str>,
        limit: u32,
    ) -> anyhow::Result<Vec<DailyStrategyPerformance>>;
    async fn upsert_daily_strategy_performance(
        &self,
        perf: &DailyStrategyPerformance,
    ) -> anyhow::Result<()>;
}
