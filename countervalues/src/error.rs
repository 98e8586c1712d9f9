//! Countervalues engine error types.

use countervalues_common::CurrencyPair;
use thiserror::Error;

/// Errors that can occur in the countervalues engine.
///
/// Only [`CountervaluesError::InvalidSettings`] and
/// [`CountervaluesError::Unexpected`] ever reach the polling controller; the
/// others are scoped to a single pair or snapshot entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CountervaluesError {
    /// The fetch source failed for this pair.
    #[error("Fetch failed for {pair}: {message}")]
    Fetch { pair: CurrencyPair, message: String },

    /// The fetch source returned points that break series invariants.
    #[error("Malformed rate data for {pair}: {reason}")]
    MalformedData { pair: CurrencyPair, reason: String },

    /// A snapshot entry could not be decoded.
    #[error("Corrupt snapshot entry {key}: {reason}")]
    CorruptSnapshot { key: String, reason: String },

    /// Settings failed validation.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Failure not attributable to any pair.
    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl CountervaluesError {
    /// Create a fetch error.
    pub fn fetch(pair: &CurrencyPair, message: impl Into<String>) -> Self {
        Self::Fetch {
            pair: pair.clone(),
            message: message.into(),
        }
    }

    /// Create a malformed data error.
    pub fn malformed(pair: &CurrencyPair, reason: impl Into<String>) -> Self {
        Self::MalformedData {
            pair: pair.clone(),
            reason: reason.into(),
        }
    }

    /// The pair this error is scoped to, if any.
    pub fn pair(&self) -> Option<&CurrencyPair> {
        match self {
            Self::Fetch { pair, .. } | Self::MalformedData { pair, .. } => Some(pair),
            _ => None,
        }
    }

    /// Whether this error is isolated to one pair and never fails a whole load.
    pub fn is_pair_scoped(&self) -> bool {
        self.pair().is_some()
    }
}

/// Result type for countervalues operations.
pub type CountervaluesResult<T> = Result<T, CountervaluesError>;
