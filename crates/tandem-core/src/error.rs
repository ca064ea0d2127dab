//! Core error type for the tandem engine.
//!
//! `EngineError` covers the failure classes the engine distinguishes:
//! configuration errors (detected at load time, never retried), structured
//! output exhaustion (the retry protocol gave up), fatal run errors
//! (sessions, the external runtime), and ledger errors (provenance I/O).

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid workflow: {0}")]
    Config(String),

    #[error("Structured output rejected after {attempts} attempts: {message}")]
    OutputExhausted { attempts: u32, message: String },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Agent runtime error: {0}")]
    Runtime(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl From<crate::runtime::RuntimeError> for EngineError {
    fn from(err: crate::runtime::RuntimeError) -> Self {
        EngineError::Runtime(err.to_string())
    }
}
