// =============================================================================
// Engine Configuration — Hot-reloadable settings with atomic save (spec §6.5)
// =============================================================================
//
// Every tunable named in the configuration table lives here so the engine can
// be reconfigured without a restart. Persistence uses an atomic tmp + rename
// pattern to prevent corruption on crash. All fields carry a serde default so
// adding a new field never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_true() -> bool {
    true
}

fn default_ws_url() -> String {
    "wss://feed.example-idx.invalid/stream".to_string()
}

fn default_ping_interval_secs() -> u64 {
    25
}

fn default_reconnect_base_secs() -> u64 {
    5
}

fn default_reconnect_max_secs() -> u64 {
    60
}

fn default_whale_value_threshold() -> f64 {
    500_000_000.0
}

fn default_whale_zscore_threshold() -> f64 {
    3.0
}

fn default_min_strategy_signals() -> u32 {
    10
}

fn default_low_win_rate_threshold() -> f64 {
    0.35
}

fn default_high_win_rate_threshold() -> f64 {
    0.60
}

fn default_min_baseline_sample_size() -> u32 {
    10
}

fn default_min_baseline_sample_size_strict() -> u32 {
    30
}

fn default_order_flow_buy_threshold() -> f64 {
    0.55
}

fn default_aggressive_buy_threshold() -> f64 {
    0.70
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_max_open_positions() -> u32 {
    10
}

fn default_stop_loss_atr_multiplier() -> f64 {
    1.5
}

fn default_trailing_stop_atr_multiplier() -> f64 {
    1.0
}

fn default_take_profit_1_atr_multiplier() -> f64 {
    2.0
}

fn default_take_profit_2_atr_multiplier() -> f64 {
    3.5
}

fn default_breakeven_trigger_pct() -> f64 {
    1.0
}

fn default_breakeven_buffer_pct() -> f64 {
    0.1
}

fn default_fallback_stop_loss_pct() -> f64 {
    1.5
}

fn default_fallback_trailing_stop_pct() -> f64 {
    1.0
}

fn default_fallback_take_profit_1_pct() -> f64 {
    3.0
}

fn default_fallback_take_profit_2_pct() -> f64 {
    5.0
}

fn default_swing_min_confidence() -> f64 {
    0.75
}

fn default_swing_atr_multiplier() -> f64 {
    2.5
}

fn default_swing_min_baseline_days() -> u32 {
    5
}

fn default_min_score_for_signal() -> u32 {
    40
}

/// Tunable exit-calculator parameters (spec §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitParams {
    #[serde(default = "default_stop_loss_atr_multiplier")]
    pub stop_loss_atr_multiplier: f64,
    #[serde(default = "default_trailing_stop_atr_multiplier")]
    pub trailing_stop_atr_multiplier: f64,
    #[serde(default = "default_take_profit_1_atr_multiplier")]
    pub take_profit_1_atr_multiplier: f64,
    #[serde(default = "default_take_profit_2_atr_multiplier")]
    pub take_profit_2_atr_multiplier: f64,
    #[serde(default = "default_breakeven_trigger_pct")]
    pub breakeven_trigger_pct: f64,
    #[serde(default = "default_breakeven_buffer_pct")]
    pub breakeven_buffer_pct: f64,

    /// Fixed-percentage fallbacks used when ATR cannot be computed (fewer
    /// than 15 M5 candles) — spec §4.11 / §8.
    #[serde(default = "default_fallback_stop_loss_pct")]
    pub fallback_stop_loss_pct: f64,
    #[serde(default = "default_fallback_trailing_stop_pct")]
    pub fallback_trailing_stop_pct: f64,
    #[serde(default = "default_fallback_take_profit_1_pct")]
    pub fallback_take_profit_1_pct: f64,
    #[serde(default = "default_fallback_take_profit_2_pct")]
    pub fallback_take_profit_2_pct: f64,
}

impl Default for ExitParams {
    fn default() -> Self {
        Self {
            stop_loss_atr_multiplier: default_stop_loss_atr_multiplier(),
            trailing_stop_atr_multiplier: default_trailing_stop_atr_multiplier(),
            take_profit_1_atr_multiplier: default_take_profit_1_atr_multiplier(),
            take_profit_2_atr_multiplier: default_take_profit_2_atr_multiplier(),
            breakeven_trigger_pct: default_breakeven_trigger_pct(),
            breakeven_buffer_pct: default_breakeven_buffer_pct(),
            fallback_stop_loss_pct: default_fallback_stop_loss_pct(),
            fallback_trailing_stop_pct: default_fallback_trailing_stop_pct(),
            fallback_take_profit_1_pct: default_fallback_take_profit_1_pct(),
            fallback_take_profit_2_pct: default_fallback_take_profit_2_pct(),
        }
    }
}

/// Swing-mode parameters, active when `enable_swing_trading` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwingParams {
    #[serde(default = "default_true")]
    pub enable_swing_trading: bool,
    #[serde(default = "default_swing_min_confidence")]
    pub swing_min_confidence: f64,
    #[serde(default = "default_swing_atr_multiplier")]
    pub swing_atr_multiplier: f64,
    #[serde(default = "default_swing_min_baseline_days")]
    pub swing_min_baseline_days: u32,
}

impl Default for SwingParams {
    fn default() -> Self {
        Self {
            enable_swing_trading: false,
            swing_min_confidence: default_swing_min_confidence(),
            swing_atr_multiplier: default_swing_atr_multiplier(),
            swing_min_baseline_days: default_swing_min_baseline_days(),
        }
    }
}

/// Top-level configuration for the market-analysis engine.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Feed ----------------------------------------------------------------
    #[serde(default = "default_ws_url")]
    pub trading_ws_url: String,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_reconnect_base_secs")]
    pub reconnect_base_secs: u64,
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,

    // --- Whale detection -------------------------------------------------
    #[serde(default = "default_whale_value_threshold")]
    pub whale_value_threshold: f64,
    #[serde(default = "default_whale_zscore_threshold")]
    pub whale_zscore_threshold: f64,

    // --- Strategy & baseline performance filter (§4.10-2) ------------------
    #[serde(default = "default_min_strategy_signals")]
    pub min_strategy_signals: u32,
    #[serde(default = "default_low_win_rate_threshold")]
    pub low_win_rate_threshold: f64,
    #[serde(default = "default_high_win_rate_threshold")]
    pub high_win_rate_threshold: f64,
    #[serde(default = "default_min_baseline_sample_size")]
    pub min_baseline_sample_size: u32,
    #[serde(default = "default_min_baseline_sample_size_strict")]
    pub min_baseline_sample_size_strict: u32,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    // --- Order flow filter (§4.10-4) ----------------------------------------
    #[serde(default = "default_true")]
    pub require_order_flow: bool,
    #[serde(default = "default_order_flow_buy_threshold")]
    pub order_flow_buy_threshold: f64,
    #[serde(default = "default_aggressive_buy_threshold")]
    pub aggressive_buy_threshold: f64,

    // --- Position management ------------------------------------------------
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,

    #[serde(default)]
    pub exit: ExitParams,
    #[serde(default)]
    pub swing: SwingParams,

    // --- Scorecard (§4.9) ---------------------------------------------------
    #[serde(default = "default_min_score_for_signal")]
    pub min_score_for_signal: u32,

    // --- Symbol universe -----------------------------------------------------
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

fn default_symbols() -> Vec<String> {
    vec![
        "BBCA".to_string(),
        "BBRI".to_string(),
        "BMRI".to_string(),
        "TLKM".to_string(),
        "ASII".to_string(),
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_ws_url: default_ws_url(),
            ping_interval_secs: default_ping_interval_secs(),
            reconnect_base_secs: default_reconnect_base_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
            whale_value_threshold: default_whale_value_threshold(),
            whale_zscore_threshold: default_whale_zscore_threshold(),
            min_strategy_signals: default_min_strategy_signals(),
            low_win_rate_threshold: default_low_win_rate_threshold(),
            high_win_rate_threshold: default_high_win_rate_threshold(),
            min_baseline_sample_size: default_min_baseline_sample_size(),
            min_baseline_sample_size_strict: default_min_baseline_sample_size_strict(),
            max_consecutive_losses: default_max_consecutive_losses(),
            require_order_flow: true,
            order_flow_buy_threshold: default_order_flow_buy_threshold(),
            aggressive_buy_threshold: default_aggressive_buy_threshold(),
            max_open_positions: default_max_open_positions(),
            exit: ExitParams::default(),
            swing: SwingParams::default(),
            min_score_for_signal: default_min_score_for_signal(),
            symbols: default_symbols(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning, matching the teacher's startup
    /// fallback behaviour.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(path = %path.display(), symbols = ?config.symbols, "engine config loaded");
        Ok(config)
    }

    /// Persist the current configuration using an atomic write (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.ping_interval_secs, 25);
        assert_eq!(cfg.reconnect_base_secs, 5);
        assert_eq!(cfg.reconnect_max_secs, 60);
        assert!((cfg.whale_value_threshold - 500_000_000.0).abs() < f64::EPSILON);
        assert_eq!(cfg.symbols.len(), 5);
        assert!(cfg.require_order_flow);
        assert!(!cfg.swing.enable_swing_trading);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.min_score_for_signal, 40);
        assert_eq!(cfg.max_consecutive_losses, 3);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["BBCA"], "min_score_for_signal": 50 }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["BBCA"]);
        assert_eq!(cfg.min_score_for_signal, 50);
        assert_eq!(cfg.reconnect_max_secs, 60);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.whale_value_threshold, cfg2.whale_value_threshold);
    }

    #[test]
    fn save_then_load_atomic_roundtrip() {
        let dir = std::env::temp_dir().join("engine_config_test_save_load_roundtrip");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine_config.json");

        let mut cfg = EngineConfig::default();
        cfg.min_score_for_signal = 77;
        cfg.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.min_score_for_signal, 77);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
