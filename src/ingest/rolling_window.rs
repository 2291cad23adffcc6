// =============================================================================
// RollingWindow — in-memory per-symbol trade arena (spec §3, §4.2)
// =============================================================================
//
// Grounded on the teacher's `market_data::CandleBuffer` ring-buffer idiom
// (`RwLock<HashMap<K, VecDeque<V>>>`, trim-to-capacity), generalized from
// candles to raw trades plus a rolling aggregate window. Exclusively owned by
// the Ingest Handler, as spec §5's shared-resource policy requires.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::repository::Trade;
use crate::types::Action;

const MAX_TRADES_PER_SYMBOL: usize = 2_000;
const AGGREGATE_WINDOW_SECS: i64 = 60;
const IDLE_EVICTION: i64 = 2 * 60 * 60; // 2 hours, seconds

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowAggregate {
    pub net_buy_sell_lots: f64,
    pub trade_count: u64,
    pub high: f64,
    pub low: f64,
}

struct SymbolWindow {
    trades: VecDeque<Trade>,
    last_trade_at: DateTime<Utc>,
}

/// Bounded ring of the last N trades and last K seconds of aggregates per
/// symbol. Created lazily on first trade; mutated only by the Ingest Handler;
/// evicted by age (≥ 2 h idle), per spec §3.
pub struct RollingWindowArena {
    windows: RwLock<HashMap<String, SymbolWindow>>,
}

impl Default for RollingWindowArena {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingWindowArena {
    pub fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Append a trade to its symbol's window, dropping entries older than
    /// the aggregate window, per spec §4.2 step 2.
    pub fn record(&self, trade: Trade) {
        let mut windows = self.windows.write();
        let window = windows.entry(trade.symbol.clone()).or_insert_with(|| SymbolWindow {
            trades: VecDeque::new(),
            last_trade_at: trade.detected_at,
        });

        window.last_trade_at = trade.detected_at;
        window.trades.push_back(trade);
        while window.trades.len() > MAX_TRADES_PER_SYMBOL {
            window.trades.pop_front();
        }
        let cutoff = window.last_trade_at - Duration::seconds(AGGREGATE_WINDOW_SECS);
        while window
            .trades
            .front()
            .map(|t| t.detected_at < cutoff)
            .unwrap_or(false)
        {
            window.trades.pop_front();
        }
    }

    /// Recompute net buy/sell lots, trade count, and high/low over the
    /// current aggregate window for `symbol`.
    pub fn aggregate(&self, symbol: &str) -> Option<WindowAggregate> {
        let windows = self.windows.read();
        let window = windows.get(symbol)?;
        if window.trades.is_empty() {
            return None;
        }

        let mut net = 0.0;
        let mut high = f64::MIN;
        let mut low = f64::MAX;
        for t in &window.trades {
            let signed = match t.action {
                Action::Buy => t.volume_lots,
                Action::Sell => -t.volume_lots,
            };
            net += signed;
            high = high.max(t.price);
            low = low.min(t.price);
        }

        Some(WindowAggregate {
            net_buy_sell_lots: net,
            trade_count: window.trades.len() as u64,
            high,
            low,
        })
    }

    pub fn recent_trades(&self, symbol: &str, limit: usize) -> Vec<Trade> {
        let windows = self.windows.read();
        match windows.get(symbol) {
            Some(w) => w.trades.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Evict symbols idle for ≥ 2 h, per spec §3.
    pub fn evict_idle(&self) {
        let cutoff = Utc::now() - Duration::seconds(IDLE_EVICTION);
        let mut windows = self.windows.write();
        windows.retain(|_, w| w.last_trade_at >= cutoff);
    }

    pub fn symbol_count(&self) -> usize {
        self.windows.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Board;

    fn trade(symbol: &str, price: f64, lots: f64, action: Action, secs_ago: i64) -> Trade {
        Trade {
            id: 0,
            detected_at: Utc::now() - Duration::seconds(secs_ago),
            symbol: symbol.to_string(),
            price,
            volume_lots: lots,
            total_value: price * lots * 100.0,
            action,
            board: Board::Rg,
            seq: 1,
        }
    }

    #[test]
    fn aggregate_computes_net_and_high_low() {
        let arena = RollingWindowArena::new();
        arena.record(trade("BBCA", 1000.0, 10.0, Action::Buy, 5));
        arena.record(trade("BBCA", 1010.0, 4.0, Action::Sell, 2));

        let agg = arena.aggregate("BBCA").unwrap();
        assert_eq!(agg.trade_count, 2);
        assert!((agg.net_buy_sell_lots - 6.0).abs() < f64::EPSILON);
        assert_eq!(agg.high, 1010.0);
        assert_eq!(agg.low, 1000.0);
    }

    #[test]
    fn window_drops_entries_older_than_aggregate_window() {
        let arena = RollingWindowArena::new();
        arena.record(trade("BBRI", 4500.0, 1.0, Action::Buy, 120));
        arena.record(trade("BBRI", 4510.0, 1.0, Action::Buy, 1));

        let agg = arena.aggregate("BBRI").unwrap();
        assert_eq!(agg.trade_count, 1);
    }

    #[test]
    fn unknown_symbol_returns_none() {
        let arena = RollingWindowArena::new();
        assert!(arena.aggregate("NOPE").is_none());
    }

    #[test]
    fn evict_idle_removes_stale_symbols() {
        let arena = RollingWindowArena::new();
        arena.record(trade("TLKM", 3000.0, 1.0, Action::Buy, 3 * 60 * 60));
        arena.evict_idle();
        assert_eq!(arena.symbol_count(), 0);
    }

    #[test]
    fn ring_trims_to_capacity() {
        let arena = RollingWindowArena::new();
        for i in 0..(MAX_TRADES_PER_SYMBOL + 50) {
            arena.record(trade("ASII", 100.0 + i as f64, 1.0, Action::Buy, 0));
        }
        let recent = arena.recent_trades("ASII", MAX_TRADES_PER_SYMBOL + 50);
        assert!(recent.len() <= MAX_TRADES_PER_SYMBOL);
    }
}
