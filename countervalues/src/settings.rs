//! Countervalues settings.

use std::collections::BTreeSet;
use std::time::Duration;

use countervalues_common::{constants, CurrencyPair};

use crate::error::{CountervaluesError, CountervaluesResult};

/// What to track and how often to refresh it.
///
/// Settings are compared structurally: two values are the same settings iff
/// they track the same pairs with the same timings. The ordered set makes the
/// comparison independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountervaluesSettings {
    /// Pairs kept up to date.
    pub tracked_pairs: BTreeSet<CurrencyPair>,
    /// Interval between automatic polls. Also the freshness threshold.
    pub autopoll_interval: Duration,
    /// Delay before the first automatic poll after `start`.
    pub poll_init_delay: Duration,
}

impl CountervaluesSettings {
    /// Track `pairs` with default timings.
    pub fn new(pairs: impl IntoIterator<Item = CurrencyPair>) -> Self {
        Self {
            tracked_pairs: pairs.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Set the autopoll interval.
    pub fn with_autopoll_interval(mut self, interval: Duration) -> Self {
        self.autopoll_interval = interval;
        self
    }

    /// Set the initial poll delay.
    pub fn with_poll_init_delay(mut self, delay: Duration) -> Self {
        self.poll_init_delay = delay;
        self
    }

    /// Whether `pair` is tracked.
    pub fn tracks(&self, pair: &CurrencyPair) -> bool {
        self.tracked_pairs.contains(pair)
    }

    /// Check the settings can drive a load.
    pub fn validate(&self) -> CountervaluesResult<()> {
        if self.autopoll_interval.is_zero() {
            return Err(CountervaluesError::InvalidSettings(
                "autopoll interval cannot be 0".to_string(),
            ));
        }

        if let Some(pair) = self.tracked_pairs.iter().find(|p| !p.is_valid()) {
            return Err(CountervaluesError::InvalidSettings(format!(
                "invalid tracked pair {}",
                pair
            )));
        }

        Ok(())
    }
}

impl Default for CountervaluesSettings {
    fn default() -> Self {
        Self {
            tracked_pairs: BTreeSet::new(),
            autopoll_interval: constants::default_autopoll_interval(),
            poll_init_delay: constants::default_poll_init_delay(),
        }
    }
}
