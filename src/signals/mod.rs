// =============================================================================
// Signals Module
// =============================================================================
//
// Signal processing pipeline for the trading engine:
// - Weighted ensemble scoring (regime-aware)
// - Signal decay / half-life freshness management
// - VPIN (Volume-Synchronized Probability of Informed Trading)

pub mod filters;
pub mod generator;
pub mod scorecard;

pub use generator::{SignalCandidate, SignalGenerator};
pub use scorecard::{score as score_candidate, ScorecardInput, ScorecardResult};
