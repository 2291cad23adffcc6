// =============================================================================
// API Module
// =============================================================================
//
// Thin REST + SSE surface over `AppState`. Not where this engine's effort
// concentrates — see `workers/`, `signals/`, `outcome/` and `followup.rs` for
// the actual analysis pipeline.
// =============================================================================

pub mod auth;
pub mod rest;

pub use rest::router;
