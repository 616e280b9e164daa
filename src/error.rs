//! Errors surfaced to engine callers.
//!
//! Judge and store failures never show up here: `evaluate` recovers from them
//! with a fallback judgment or a forced cache miss.

use crate::config::ConfigError;
use crate::hints::HintError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rejected before any state was touched.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Lost a race with ledger finalization twice; safe to retry.
    #[error("concurrent update conflict; retry the request")]
    ConcurrencyConflict,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict)
    }
}

impl From<HintError> for EngineError {
    fn from(err: HintError) -> Self {
        match err {
            HintError::InvalidRequest(message) => Self::InvalidRequest(message),
            HintError::ConcurrencyConflict => Self::ConcurrencyConflict,
        }
    }
}
