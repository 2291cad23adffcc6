// =============================================================================
// Shared types used across the market-analysis engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Side of a trade / decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Exchange board the trade printed on. `RG` (regular market) is the only
/// board the engine currently reasons about; others pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Board {
    Rg,
    Other(String),
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rg => write!(f, "RG"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Candidate/persisted signal decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Buy,
    Sell,
    Wait,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Wait => write!(f, "WAIT"),
        }
    }
}

/// Per-symbol market regime classification (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeKind {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    Neutral,
}

impl Default for RegimeKind {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for RegimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingUp => write!(f, "TRENDING_UP"),
            Self::TrendingDown => write!(f, "TRENDING_DOWN"),
            Self::Ranging => write!(f, "RANGING"),
            Self::Volatile => write!(f, "VOLATILE"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// SignalOutcome lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Open,
    Win,
    Loss,
    Breakeven,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Win => write!(f, "WIN"),
            Self::Loss => write!(f, "LOSS"),
            Self::Breakeven => write!(f, "BREAKEVEN"),
        }
    }
}

/// Terminal exit reasons for a SignalOutcome (spec §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    AtrStop,
    TrailingStopHit,
    TakeProfitFull,
    TakeProfitTimeBased,
    MaxHoldingProfit,
    MaxHoldingSmallProfit,
    ScaledTakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AtrStop => "ATR_STOP",
            Self::TrailingStopHit => "TRAILING_STOP_HIT",
            Self::TakeProfitFull => "TAKE_PROFIT_FULL",
            Self::TakeProfitTimeBased => "TAKE_PROFIT_TIME_BASED",
            Self::MaxHoldingProfit => "MAX_HOLDING_PROFIT",
            Self::MaxHoldingSmallProfit => "MAX_HOLDING_SMALL_PROFIT",
            Self::ScaledTakeProfit => "SCALED_TAKE_PROFIT",
        };
        write!(f, "{s}")
    }
}

/// Structural pattern kind (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternType {
    RangeBreakout,
    DoubleBottom,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RangeBreakout => write!(f, "RANGE_BREAKOUT"),
            Self::DoubleBottom => write!(f, "DOUBLE_BOTTOM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternDirection {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternOutcome {
    Pending,
    Confirmed,
    Failed,
}

/// Followup impact classification (spec §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactClass {
    Positive,
    Negative,
    Neutral,
}

/// Candle timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::D1 => "1d",
        };
        write!(f, "{s}")
    }
}
