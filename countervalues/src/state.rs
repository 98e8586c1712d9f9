//! Immutable countervalues state.

use std::collections::HashMap;
use std::sync::Arc;

use countervalues_common::{CurrencyPair, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::CountervaluesError;
use crate::series::RateSeries;

/// Kind of the last failure recorded for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairErrorKind {
    /// The fetch source failed.
    Fetch,
    /// The fetch source returned invalid points.
    MalformedData,
}

/// Last failure recorded for a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairError {
    pub kind: PairErrorKind,
    pub message: String,
    /// When the failing fetch settled.
    pub at: Timestamp,
}

impl PairError {
    /// Record a pair-scoped error at `at`.
    pub fn from_error(error: &CountervaluesError, at: Timestamp) -> Self {
        let (kind, message) = match error {
            CountervaluesError::MalformedData { reason, .. } => {
                (PairErrorKind::MalformedData, reason.clone())
            }
            CountervaluesError::Fetch { message, .. } => (PairErrorKind::Fetch, message.clone()),
            other => (PairErrorKind::Fetch, other.to_string()),
        };
        Self { kind, message, at }
    }
}

/// Fetch bookkeeping for one pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairStatus {
    /// When data for the pair was last fetched successfully.
    pub last_success: Option<Timestamp>,
    /// Error of the last attempt, cleared by the next success.
    pub last_error: Option<PairError>,
}

impl PairStatus {
    /// Status after a successful fetch.
    pub fn succeeded(at: Timestamp) -> Self {
        Self {
            last_success: Some(at),
            last_error: None,
        }
    }

    /// Status after a failed fetch, keeping the previous success time.
    pub fn failed(previous: Option<&PairStatus>, error: PairError) -> Self {
        Self {
            last_success: previous.and_then(|s| s.last_success),
            last_error: Some(error),
        }
    }

    pub fn is_errored(&self) -> bool {
        self.last_error.is_some()
    }
}

/// A consistent snapshot of every cached series and pair status.
///
/// Series are reference counted so a new version shares every pair it did not
/// touch with the version it was derived from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterValuesState {
    data: HashMap<CurrencyPair, Arc<RateSeries>>,
    status: HashMap<CurrencyPair, PairStatus>,
}

impl CounterValuesState {
    /// The empty state.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        data: HashMap<CurrencyPair, Arc<RateSeries>>,
        status: HashMap<CurrencyPair, PairStatus>,
    ) -> Self {
        Self { data, status }
    }

    /// Series for a pair, if any data is cached.
    pub fn series(&self, pair: &CurrencyPair) -> Option<&Arc<RateSeries>> {
        self.data.get(pair)
    }

    /// Status for a pair, if it was ever fetched.
    pub fn status(&self, pair: &CurrencyPair) -> Option<&PairStatus> {
        self.status.get(pair)
    }

    pub fn data(&self) -> &HashMap<CurrencyPair, Arc<RateSeries>> {
        &self.data
    }

    pub fn statuses(&self) -> &HashMap<CurrencyPair, PairStatus> {
        &self.status
    }

    /// Whether nothing has been fetched or imported.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.status.is_empty()
    }

    /// Derive a new version with one pair's series and status replaced.
    pub fn with_pair(
        &self,
        pair: CurrencyPair,
        series: Option<Arc<RateSeries>>,
        status: PairStatus,
    ) -> Self {
        let mut next = self.clone();
        if let Some(series) = series {
            next.data.insert(pair.clone(), series);
        }
        next.status.insert(pair, status);
        next
    }

    pub(crate) fn data_mut(&mut self) -> &mut HashMap<CurrencyPair, Arc<RateSeries>> {
        &mut self.data
    }

    pub(crate) fn status_mut(&mut self) -> &mut HashMap<CurrencyPair, PairStatus> {
        &mut self.status
    }

    /// Get state statistics.
    pub fn stats(&self) -> StateStats {
        StateStats {
            pairs: self.data.len(),
            points: self.data.values().map(|s| s.len()).sum(),
            errored_pairs: self.status.values().filter(|s| s.is_errored()).count(),
        }
    }
}

/// State statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateStats {
    pub pairs: usize,
    pub points: usize,
    pub errored_pairs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::RatePoint;
    use chrono::Utc;
    use countervalues_common::Currency;
    use rust_decimal_macros::dec;

    fn pair() -> CurrencyPair {
        CurrencyPair::new(Currency::btc(), Currency::usd())
    }

    #[test]
    fn test_with_pair_leaves_original_untouched() {
        let empty = CounterValuesState::new();
        let series = Arc::new(RateSeries::from_points(vec![RatePoint::new(Utc::now(), dec!(1))]).unwrap());

        let next = empty.with_pair(pair(), Some(series.clone()), PairStatus::succeeded(Utc::now()));

        assert!(empty.is_empty());
        assert!(Arc::ptr_eq(next.series(&pair()).unwrap(), &series));
        assert_eq!(next.stats(), StateStats { pairs: 1, points: 1, errored_pairs: 0 });
    }

    #[test]
    fn test_failed_status_keeps_last_success() {
        let at = Utc::now();
        let ok = PairStatus::succeeded(at);
        let err = PairError::from_error(&CountervaluesError::fetch(&pair(), "timeout"), at);

        let failed = PairStatus::failed(Some(&ok), err);

        assert_eq!(failed.last_success, Some(at));
        assert_eq!(failed.last_error.as_ref().unwrap().kind, PairErrorKind::Fetch);
        assert_eq!(failed.last_error.as_ref().unwrap().message, "timeout");
    }

    #[test]
    fn test_unrelated_series_are_shared() {
        let other = CurrencyPair::new(Currency::eth(), Currency::usd());
        let series = Arc::new(RateSeries::default());
        let base = CounterValuesState::new().with_pair(other.clone(), Some(series), PairStatus::default());

        let next = base.with_pair(pair(), None, PairStatus::default());

        assert!(Arc::ptr_eq(base.series(&other).unwrap(), next.series(&other).unwrap()));
        assert!(next.series(&pair()).is_none());
        assert!(next.status(&pair()).is_some());
    }
}
