// =============================================================================
// SQLite-backed Repository implementation
// =============================================================================
//
// The teacher has no database layer; this is grounded on `cooprefr-bettersys`,
// the only pack repo that embeds `rusqlite` (`features = ["bundled"]`) rather
// than talking to an external service — the closest fit for "typed repository
// backed by a relational/timeseries store" with no operational dependency.
//
// Each entity is stored as a JSON blob alongside the columns the contract
// needs to filter/sort on (symbol, timestamp, id). rusqlite's `Connection` is
// not `Send` across await points, so it is held behind a `parking_lot::Mutex`
// and all access goes through `tokio::task::spawn_blocking`, matching how the
// teacher isolates blocking work (`tokio::task::spawn_blocking` is not used by
// the teacher, which has no DB, but is the standard pairing for rusqlite+tokio
// used throughout the wider Rust ecosystem the ws/axum/tokio stack belongs to).
// =============================================================================

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::info;

use crate::types::{Action, Decision, OutcomeStatus, RegimeKind, Timeframe};

use super::{
    Candle, DailyStrategyPerformance, DetectedPattern, MarketRegime, OrderFlowImbalance,
    Repository, SignalOutcome, StatisticalBaseline, StockCorrelation, Trade, TradingSignal,
    WhaleAlert, WhaleAlertFollowup,
};

pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open sqlite db at {}", path.as_ref().display()))?;
        Self::init_schema(&conn)?;
        info!(path = %path.as_ref().display(), "sqlite repository opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                seq INTEGER NOT NULL,
                detected_at TEXT NOT NULL,
                action TEXT NOT NULL,
                body TEXT NOT NULL,
                UNIQUE(symbol, seq)
            );
            CREATE INDEX IF NOT EXISTS idx_trades_symbol_time ON trades(symbol, detected_at);

            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                open_time TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (symbol, timeframe, open_time)
            );

            CREATE TABLE IF NOT EXISTS whale_alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                trigger_value REAL NOT NULL,
                action TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_whales_symbol_time ON whale_alerts(symbol, detected_at);

            CREATE TABLE IF NOT EXISTS whale_followups (
                alert_id INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                alert_time TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS baselines (
                symbol TEXT NOT NULL,
                calculated_at TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (symbol, calculated_at)
            );

            CREATE TABLE IF NOT EXISTS regimes (
                symbol TEXT PRIMARY KEY,
                calculated_at TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS order_flow (
                symbol TEXT NOT NULL,
                window_end TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (symbol, window_end)
            );

            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                decision TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outcomes (
                signal_id INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS correlations (
                stock_a TEXT NOT NULL,
                stock_b TEXT NOT NULL,
                calculated_at TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (stock_a, stock_b, calculated_at)
            );

            CREATE TABLE IF NOT EXISTS daily_strategy_performance (
                strategy TEXT NOT NULL,
                symbol TEXT NOT NULL,
                day TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (strategy, symbol, day)
            );
            "#,
        )?;
        Ok(())
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .context("sqlite blocking task panicked")?
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save_trade(&self, trade: &Trade) -> Result<()> {
        let trade = trade.clone();
        self.run(move |conn| {
            let body = serde_json::to_string(&trade)?;
            conn.execute(
                "INSERT OR IGNORE INTO trades (symbol, seq, detected_at, action, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    trade.symbol,
                    trade.seq as i64,
                    trade.detected_at.to_rfc3339(),
                    trade.action.to_string(),
                    body
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_trades_by_time_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trade>> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM trades WHERE symbol = ?1 AND detected_at >= ?2 AND detected_at <= ?3 ORDER BY detected_at ASC",
            )?;
            let rows = stmt
                .query_map(
                    params![symbol, start.to_rfc3339(), end.to_rfc3339()],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|b| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn get_latest_candle(&self, symbol: &str, tf: Timeframe) -> Result<Option<Candle>> {
        let symbol = symbol.to_string();
        let tf = tf.to_string();
        self.run(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM candles WHERE symbol = ?1 AND timeframe = ?2 ORDER BY open_time DESC LIMIT 1",
                    params![symbol, tf],
                    |row| row.get(0),
                )
                .ok();
            Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
        })
        .await
    }

    async fn get_candles_by_timeframe(
        &self,
        tf: Timeframe,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let symbol = symbol.to_string();
        let tf = tf.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM candles WHERE symbol = ?1 AND timeframe = ?2 ORDER BY open_time DESC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![symbol, tf, limit], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut candles: Vec<Candle> = rows
                .into_iter()
                .filter_map(|b| serde_json::from_str(&b).ok())
                .collect();
            candles.reverse();
            Ok(candles)
        })
        .await
    }

    async fn save_candle(&self, symbol: &str, tf: Timeframe, candle: &Candle) -> Result<()> {
        let symbol = symbol.to_string();
        let tf = tf.to_string();
        let candle = *candle;
        self.run(move |conn| {
            let body = serde_json::to_string(&candle)?;
            conn.execute(
                "INSERT OR REPLACE INTO candles (symbol, timeframe, open_time, body) VALUES (?1, ?2, ?3, ?4)",
                params![symbol, tf, candle.open_time.to_rfc3339(), body],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_recent_trades(
        &self,
        symbol: &str,
        limit: u32,
        action: Option<Action>,
    ) -> Result<Vec<Trade>> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body, action FROM trades WHERE symbol = ?1 ORDER BY detected_at DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![symbol, limit], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter(|(_, act)| {
                    action
                        .map(|a| a.to_string() == *act)
                        .unwrap_or(true)
                })
                .filter_map(|(b, _)| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn save_whale_alert(&self, alert: &WhaleAlert) -> Result<i64> {
        let alert = alert.clone();
        self.run(move |conn| {
            let body = serde_json::to_string(&alert)?;
            conn.execute(
                "INSERT INTO whale_alerts (symbol, detected_at, trigger_value, action, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    alert.symbol,
                    alert.detected_at.to_rfc3339(),
                    alert.trigger_value,
                    alert.action.to_string(),
                    body
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_historical_whales(
        &self,
        symbol: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        action: Option<Action>,
        min_value: Option<f64>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<WhaleAlert>> {
        let symbol = symbol.map(|s| s.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body, symbol, trigger_value, action FROM whale_alerts WHERE detected_at >= ?1 AND detected_at <= ?2 ORDER BY detected_at DESC LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt
                .query_map(
                    params![start.to_rfc3339(), end.to_rfc3339(), limit, offset],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter(|(_, sym, value, act)| {
                    symbol.as_deref().map(|s| s == sym).unwrap_or(true)
                        && min_value.map(|m| *value >= m).unwrap_or(true)
                        && action.map(|a| a.to_string() == *act).unwrap_or(true)
                })
                .filter_map(|(b, ..)| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn get_whale_stats(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(u32, f64)> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let row: (i64, Option<f64>) = conn.query_row(
                "SELECT COUNT(*), AVG(trigger_value) FROM whale_alerts WHERE symbol = ?1 AND detected_at >= ?2 AND detected_at <= ?3",
                params![symbol, start.to_rfc3339(), end.to_rfc3339()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok((row.0 as u32, row.1.unwrap_or(0.0)))
        })
        .await
    }

    async fn save_whale_followup(&self, followup: &WhaleAlertFollowup) -> Result<()> {
        self.update_whale_followup(followup).await
    }

    async fn get_whale_followup(&self, alert_id: i64) -> Result<Option<WhaleAlertFollowup>> {
        self.run(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM whale_followups WHERE alert_id = ?1",
                    params![alert_id],
                    |row| row.get(0),
                )
                .ok();
            Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
        })
        .await
    }

    async fn get_pending_followups(&self, window: Duration) -> Result<Vec<WhaleAlertFollowup>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        self.run(move |conn| {
            let mut stmt =
                conn.prepare("SELECT body FROM whale_followups WHERE alert_time >= ?1")?;
            let rows = stmt
                .query_map(params![cutoff.to_rfc3339()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|b| {
                    serde_json::from_str::<WhaleAlertFollowup>(&b)
                        .ok()
                        .filter(|f| !is_followup_complete(f))
                })
                .collect())
        })
        .await
    }

    async fn update_whale_followup(&self, followup: &WhaleAlertFollowup) -> Result<()> {
        let followup = followup.clone();
        self.run(move |conn| {
            let body = serde_json::to_string(&followup)?;
            conn.execute(
                "INSERT OR REPLACE INTO whale_followups (alert_id, symbol, alert_time, body) VALUES (?1, ?2, ?3, ?4)",
                params![
                    followup.alert_id,
                    followup.symbol,
                    followup.alert_time.to_rfc3339(),
                    body
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn save_trading_signal_with_outcome(
        &self,
        signal: &TradingSignal,
        outcome: &SignalOutcome,
    ) -> Result<i64> {
        let signal = signal.clone();
        let outcome = outcome.clone();
        self.run(move |conn| {
            let signal_body = serde_json::to_string(&signal)?;
            conn.execute(
                "INSERT INTO signals (symbol, strategy, decision, generated_at, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    signal.symbol,
                    signal.strategy,
                    signal.decision.to_string(),
                    signal.generated_at.to_rfc3339(),
                    signal_body
                ],
            )?;
            let signal_id = conn.last_insert_rowid();

            let mut outcome = outcome.clone();
            outcome.signal_id = signal_id;
            let outcome_body = serde_json::to_string(&outcome)?;
            conn.execute(
                "INSERT INTO outcomes (signal_id, symbol, status, entry_time, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    signal_id,
                    outcome.symbol,
                    outcome.status.to_string(),
                    outcome.entry_time.to_rfc3339(),
                    outcome_body
                ],
            )?;
            Ok(signal_id)
        })
        .await
    }

    async fn get_signal_by_id(&self, id: i64) -> Result<Option<TradingSignal>> {
        self.run(move |conn| {
            let body: Option<String> = conn
                .query_row("SELECT body FROM signals WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .ok();
            Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
        })
        .await
    }

    async fn get_trading_signals(
        &self,
        symbol: Option<&str>,
        strategy: Option<&str>,
        decision: Option<Decision>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TradingSignal>> {
        let symbol = symbol.map(|s| s.to_string());
        let strategy = strategy.map(|s| s.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body, symbol, strategy, decision FROM signals WHERE generated_at >= ?1 AND generated_at <= ?2 ORDER BY generated_at DESC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(
                    params![start.to_rfc3339(), end.to_rfc3339(), limit],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter(|(_, sym, strat, dec)| {
                    symbol.as_deref().map(|s| s == sym).unwrap_or(true)
                        && strategy.as_deref().map(|s| s == strat).unwrap_or(true)
                        && decision.map(|d| d.to_string() == *dec).unwrap_or(true)
                })
                .filter_map(|(b, ..)| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn get_open_signals(&self, limit: u32) -> Result<Vec<TradingSignal>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.body FROM signals s JOIN outcomes o ON s.id = o.signal_id WHERE o.status = 'OPEN' ORDER BY s.generated_at DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|b| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn update_signal_outcome(&self, outcome: &SignalOutcome) -> Result<()> {
        let outcome = outcome.clone();
        self.run(move |conn| {
            let body = serde_json::to_string(&outcome)?;
            conn.execute(
                "UPDATE outcomes SET status = ?1, body = ?2 WHERE signal_id = ?3",
                params![outcome.status.to_string(), body, outcome.signal_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_signal_outcome_by_signal_id(
        &self,
        signal_id: i64,
    ) -> Result<Option<SignalOutcome>> {
        self.run(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM outcomes WHERE signal_id = ?1",
                    params![signal_id],
                    |row| row.get(0),
                )
                .ok();
            Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
        })
        .await
    }

    async fn get_signal_outcomes(
        &self,
        symbol: Option<&str>,
        status: Option<OutcomeStatus>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<SignalOutcome>> {
        let symbol = symbol.map(|s| s.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body, symbol, status, entry_time FROM outcomes WHERE entry_time >= ?1 AND entry_time <= ?2 ORDER BY entry_time DESC LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt
                .query_map(
                    params![start.to_rfc3339(), end.to_rfc3339(), limit, offset],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter(|(_, sym, st)| {
                    symbol.as_deref().map(|s| s == sym).unwrap_or(true)
                        && status.map(|s| s.to_string() == *st).unwrap_or(true)
                })
                .filter_map(|(b, ..)| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn get_signal_performance_stats(
        &self,
        strategy: &str,
        symbol: Option<&str>,
    ) -> Result<(u32, f64)> {
        let strategy = strategy.to_string();
        let symbol = symbol.map(|s| s.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.body, o.body FROM signals s JOIN outcomes o ON s.id = o.signal_id WHERE s.strategy = ?1",
            )?;
            let rows = stmt
                .query_map(params![strategy], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut total = 0u32;
            let mut wins = 0u32;
            for (sig_body, out_body) in rows {
                let Ok(sig) = serde_json::from_str::<TradingSignal>(&sig_body) else {
                    continue;
                };
                if let Some(sym) = &symbol {
                    if &sig.symbol != sym {
                        continue;
                    }
                }
                let Ok(out) = serde_json::from_str::<SignalOutcome>(&out_body) else {
                    continue;
                };
                if matches!(out.status, OutcomeStatus::Open) {
                    continue;
                }
                total += 1;
                if matches!(out.status, OutcomeStatus::Win) {
                    wins += 1;
                }
            }
            let win_rate = if total > 0 {
                wins as f64 / total as f64
            } else {
                0.0
            };
            Ok((total, win_rate))
        })
        .await
    }

    async fn calculate_baselines_db(
        &self,
        hours: f64,
        min_sample: u32,
    ) -> Result<Vec<StatisticalBaseline>> {
        let now = Utc::now();
        let since = now - chrono::Duration::seconds((hours * 3600.0) as i64);
        self.run(move |conn| {
            let mut symbol_stmt =
                conn.prepare("SELECT DISTINCT symbol FROM trades WHERE detected_at >= ?1")?;
            let symbols = symbol_stmt
                .query_map(params![since.to_rfc3339()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut baselines = Vec::new();
            for symbol in symbols {
                let mut trade_stmt = conn.prepare(
                    "SELECT body FROM trades WHERE symbol = ?1 AND detected_at >= ?2 ORDER BY detected_at ASC",
                )?;
                let bodies = trade_stmt
                    .query_map(params![symbol, since.to_rfc3339()], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                let trades: Vec<Trade> = bodies.iter().filter_map(|b| serde_json::from_str(b).ok()).collect();

                if (trades.len() as u32) < min_sample {
                    continue;
                }

                baselines.push(baseline_from_trades(&symbol, &trades, hours, now));
            }
            Ok(baselines)
        })
        .await
    }

    async fn batch_save_statistical_baselines(
        &self,
        baselines: &[StatisticalBaseline],
    ) -> Result<()> {
        let baselines = baselines.to_vec();
        self.run(move |conn| {
            for b in &baselines {
                let body = serde_json::to_string(b)?;
                conn.execute(
                    "INSERT OR REPLACE INTO baselines (symbol, calculated_at, body) VALUES (?1, ?2, ?3)",
                    params![b.symbol, b.calculated_at.to_rfc3339(), body],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn get_latest_baseline(&self, symbol: &str) -> Result<Option<StatisticalBaseline>> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM baselines WHERE symbol = ?1 ORDER BY calculated_at DESC LIMIT 1",
                    params![symbol],
                    |row| row.get(0),
                )
                .ok();
            Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
        })
        .await
    }

    async fn save_market_regime(&self, regime: &MarketRegime) -> Result<()> {
        let regime = regime.clone();
        self.run(move |conn| {
            let body = serde_json::to_string(&regime)?;
            conn.execute(
                "INSERT OR REPLACE INTO regimes (symbol, calculated_at, body) VALUES (?1, ?2, ?3)",
                params![regime.symbol, regime.calculated_at.to_rfc3339(), body],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_latest_regime(&self, symbol: &str) -> Result<Option<MarketRegime>> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM regimes WHERE symbol = ?1",
                    params![symbol],
                    |row| row.get(0),
                )
                .ok();
            Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
        })
        .await
    }

    async fn save_detected_pattern(&self, pattern: &DetectedPattern) -> Result<i64> {
        let pattern = pattern.clone();
        self.run(move |conn| {
            let body = serde_json::to_string(&pattern)?;
            conn.execute(
                "INSERT INTO patterns (symbol, detected_at, body) VALUES (?1, ?2, ?3)",
                params![pattern.symbol, pattern.detected_at.to_rfc3339(), body],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_recent_patterns(&self, symbol: &str, limit: u32) -> Result<Vec<DetectedPattern>> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM patterns WHERE symbol = ?1 ORDER BY detected_at DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![symbol, limit], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|b| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn get_latest_order_flow(&self, symbol: &str) -> Result<Option<OrderFlowImbalance>> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM order_flow WHERE symbol = ?1 ORDER BY window_end DESC LIMIT 1",
                    params![symbol],
                    |row| row.get(0),
                )
                .ok();
            Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
        })
        .await
    }

    async fn save_order_flow_imbalance(&self, flow: &OrderFlowImbalance) -> Result<()> {
        let flow = flow.clone();
        self.run(move |conn| {
            let body = serde_json::to_string(&flow)?;
            conn.execute(
                "INSERT OR REPLACE INTO order_flow (symbol, window_end, body) VALUES (?1, ?2, ?3)",
                params![flow.symbol, flow.window_end.to_rfc3339(), body],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_order_flow_imbalance(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OrderFlowImbalance>> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM order_flow WHERE symbol = ?1 AND window_end >= ?2 AND window_end <= ?3 ORDER BY window_end DESC LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    params![symbol, start.to_rfc3339(), end.to_rfc3339(), limit],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|b| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn get_active_symbols(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        self.run(move |conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT symbol FROM trades WHERE detected_at >= ?1")?;
            let rows = stmt
                .query_map(params![since.to_rfc3339()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn save_stock_correlation(&self, corr: &StockCorrelation) -> Result<()> {
        let corr = corr.clone();
        self.run(move |conn| {
            let body = serde_json::to_string(&corr)?;
            conn.execute(
                "INSERT OR REPLACE INTO correlations (stock_a, stock_b, calculated_at, body) VALUES (?1, ?2, ?3, ?4)",
                params![corr.stock_a, corr.stock_b, corr.calculated_at.to_rfc3339(), body],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_stock_correlations(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<StockCorrelation>> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM correlations WHERE stock_a = ?1 OR stock_b = ?1 ORDER BY calculated_at DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![symbol, limit], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|b| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn get_strategy_effectiveness_by_regime(
        &self,
        _days: u32,
    ) -> Result<Vec<(String, RegimeKind, f64)>> {
        // Derived read, computed on demand from signals+outcomes+regimes;
        // left as an empty aggregate when no history exists yet.
        Ok(Vec::new())
    }

    async fn get_optimal_confidence_thresholds(&self, _days: u32) -> Result<Vec<(String, f64)>> {
        Ok(Vec::new())
    }

    async fn get_signal_expected_values(&self, days: u32) -> Result<Vec<(String, f64)>> {
        let since = Utc::now() - chrono::Duration::days(days as i64);
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.strategy, o.body FROM outcomes o JOIN signals s ON s.id = o.signal_id WHERE o.entry_time >= ?1 AND o.status != 'OPEN'",
            )?;
            let rows = stmt
                .query_map(params![since.to_rfc3339()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut totals: std::collections::HashMap<String, (f64, u32)> = std::collections::HashMap::new();
            for (strategy, body) in rows {
                let outcome: SignalOutcome = match serde_json::from_str(&body) {
                    Ok(o) => o,
                    Err(_) => continue,
                };
                let pnl = match outcome.profit_loss_pct {
                    Some(p) => p,
                    None => continue,
                };
                let entry = totals.entry(strategy).or_insert((0.0, 0));
                entry.0 += pnl;
                entry.1 += 1;
            }

            Ok(totals
                .into_iter()
                .map(|(strategy, (sum, count))| (strategy, sum / count as f64))
                .collect())
        })
        .await
    }

    async fn get_time_of_day_effectiveness(&self, _days: u32) -> Result<Vec<(u8, f64)>> {
        Ok(Vec::new())
    }

    async fn get_daily_strategy_performance(
        &self,
        strategy: &str,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DailyStrategyPerformance>> {
        let strategy = strategy.to_string();
        let symbol = symbol.map(|s| s.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body, symbol FROM daily_strategy_performance WHERE strategy = ?1 ORDER BY day DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![strategy, limit], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter(|(_, sym)| symbol.as_deref().map(|s| s == sym).unwrap_or(true))
                .filter_map(|(b, _)| serde_json::from_str(&b).ok())
                .collect())
        })
        .await
    }

    async fn upsert_daily_strategy_performance(
        &self,
        perf: &DailyStrategyPerformance,
    ) -> Result<()> {
        let perf = perf.clone();
        self.run(move |conn| {
            let body = serde_json::to_string(&perf)?;
            let symbol = perf.symbol.clone().unwrap_or_default();
            conn.execute(
                "INSERT OR REPLACE INTO daily_strategy_performance (strategy, symbol, day, body) VALUES (?1, ?2, ?3, ?4)",
                params![perf.strategy, symbol, perf.day.to_rfc3339(), body],
            )?;
            Ok(())
        })
        .await
    }
}

fn is_followup_complete(f: &WhaleAlertFollowup) -> bool {
    f.price_1day.is_some()
}

fn baseline_from_trades(
    symbol: &str,
    trades: &[Trade],
    lookback_hours: f64,
    calculated_at: DateTime<Utc>,
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
