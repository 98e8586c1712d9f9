//! Time utilities and constants for the countervalues engine.

use chrono::{DateTime, Duration, Utc};

/// Polling timing constants.
pub mod constants {
    use std::time::Duration;

    /// Default interval between two automatic polls (120 seconds).
    pub fn default_autopoll_interval() -> Duration {
        Duration::from_secs(120)
    }

    /// Default delay before the first automatic poll (1 second).
    pub fn default_poll_init_delay() -> Duration {
        Duration::from_secs(1)
    }
}

/// A point in time (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Whether `since` is at least `max_age` before `at`.
pub fn is_older_than(since: Timestamp, max_age: std::time::Duration, at: Timestamp) -> bool {
    at.signed_duration_since(since) >= max_age.to_chrono()
}

/// Conversions from std durations.
pub trait StdDurationExt {
    fn to_chrono(&self) -> Duration;
}

impl StdDurationExt for std::time::Duration {
    fn to_chrono(&self) -> Duration {
        Duration::from_std(*self).unwrap_or_else(|_| Duration::max_value())
    }
}
