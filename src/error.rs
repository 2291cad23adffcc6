// =============================================================================
// Error taxonomy (spec §7)
// =============================================================================
//
// Transient/skip/policy conditions are logged and swallowed at the call site;
// this enum exists for the cases callers must branch on: auth expiry drives
// the reconnection protocol, invariant violations quarantine an entity, and
// fatal errors abort startup. Plain I/O failures elsewhere use `anyhow`.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient I/O error: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("upstream frame skipped: {0}")]
    ProtocolSkip(String),

    #[error("upstream credential expired or rejected")]
    AuthExpired,

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("policy rejection: {0}")]
    Policy(String),

    #[error("fatal startup error: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
