//! Error types shared across the countervalues workspace.

use thiserror::Error;

/// Errors raised while parsing shared types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Currency code is empty or contains a reserved character.
    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    /// Pair key is not of the form `FROM/TO`.
    #[error("Invalid pair key: {0}")]
    InvalidPairKey(String),
}

impl CommonError {
    /// Get error code for log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            CommonError::InvalidCurrency(_) => "INVALID_CURRENCY",
            CommonError::InvalidPairKey(_) => "INVALID_PAIR_KEY",
        }
    }
}
