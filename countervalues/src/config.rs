//! Engine configuration.

use std::time::Duration;

use countervalues_common::{constants, CommonError, CurrencyPair};
use tracing::warn;

use crate::settings::CountervaluesSettings;

/// Configuration for a [`crate::Countervalues`] engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pairs to track.
    pub tracked_pairs: Vec<CurrencyPair>,
    /// Interval between automatic polls.
    pub autopoll_interval: Duration,
    /// Delay before the first automatic poll.
    pub poll_init_delay: Duration,
    /// Start automatic polling as soon as the engine is built.
    pub autostart: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tracked_pairs: Vec::new(),
            autopoll_interval: constants::default_autopoll_interval(),
            poll_init_delay: constants::default_poll_init_delay(),
            autostart: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    ///
    /// Reads `COUNTERVALUES_PAIRS` (`BTC/USD,ETH/USD`),
    /// `COUNTERVALUES_AUTOPOLL_MS`, `COUNTERVALUES_POLL_INIT_DELAY_MS` and
    /// `COUNTERVALUES_AUTOSTART`. Unparseable values keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(pairs) = lookup("COUNTERVALUES_PAIRS") {
            match parse_pairs(&pairs) {
                Ok(pairs) => config.tracked_pairs = pairs,
                Err(e) => warn!(error = %e, code = e.error_code(), "Ignoring COUNTERVALUES_PAIRS"),
            }
        }

        if let Some(ms) = lookup("COUNTERVALUES_AUTOPOLL_MS") {
            if let Ok(ms) = ms.parse() {
                config.autopoll_interval = Duration::from_millis(ms);
            }
        }

        if let Some(ms) = lookup("COUNTERVALUES_POLL_INIT_DELAY_MS") {
            if let Ok(ms) = ms.parse() {
                config.poll_init_delay = Duration::from_millis(ms);
            }
        }

        if let Some(flag) = lookup("COUNTERVALUES_AUTOSTART") {
            if let Ok(flag) = flag.parse() {
                config.autostart = flag;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.autopoll_interval.is_zero() {
            return Err("Autopoll interval cannot be 0".to_string());
        }

        if let Some(pair) = self.tracked_pairs.iter().find(|p| !p.is_valid()) {
            return Err(format!("Invalid tracked pair {}", pair));
        }

        Ok(())
    }

    /// Settings the engine starts with.
    pub fn settings(&self) -> CountervaluesSettings {
        CountervaluesSettings::new(self.tracked_pairs.iter().cloned())
            .with_autopoll_interval(self.autopoll_interval)
            .with_poll_init_delay(self.poll_init_delay)
    }
}

/// Parse a comma-separated list of `FROM/TO` pair keys.
pub fn parse_pairs(list: &str) -> Result<Vec<CurrencyPair>, CommonError> {
    list.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(CurrencyPair::from_key)
        .collect()
}
