//! Error types for Latchkey
//!
//! `LatchkeyError` covers application-level failures (bad configuration,
//! bad arguments). Lock operation errors live in `latchkey-lock`.

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum LatchkeyError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}
