//! Error types for the Ratekeeper service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Ratekeeper operations.
#[derive(Error, Debug)]
pub enum RatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two configured rules derive the same canonical key
    #[error("Duplicate rate limit rule for key {key}")]
    DuplicateRule { key: String },

    /// A configured rule can never be matched or enforced
    #[error("Invalid rate limit rule: {0}")]
    InvalidRule(String),

    /// Counter store failures (unavailable, timeout, rejected command)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A counter key holds something that is not an integer
    #[error("Corrupt counter value {value:?} at key {key}")]
    CorruptCounter { key: String, value: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatekeeperError>;
