//! Rate fetch source trait and test implementation.

use async_trait::async_trait;
use countervalues_common::{CurrencyPair, Timestamp};

use crate::error::CountervaluesResult;
use crate::series::RatePoint;

/// Source of historical rates for a pair.
///
/// Implementations own transport concerns such as timeouts and retries; the
/// engine calls `fetch` at most once per pair per load.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Fetch points for `pair`, from `since` onward when given, else the full history.
    async fn fetch(
        &self,
        pair: &CurrencyPair,
        since: Option<Timestamp>,
    ) -> CountervaluesResult<Vec<RatePoint>>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockRateFetcher;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use countervalues_common::{CurrencyPair, Timestamp};
    use dashmap::DashMap;
    use parking_lot::Mutex;

    use super::RateFetcher;
    use crate::error::{CountervaluesError, CountervaluesResult};
    use crate::series::RatePoint;

    /// In-memory fetch source for tests.
    ///
    /// Serves the points registered per pair (filtered by `since`), fails pairs
    /// marked as failing, and records every call.
    pub struct MockRateFetcher {
        name: String,
        rates: DashMap<CurrencyPair, Vec<RatePoint>>,
        failing: DashMap<CurrencyPair, String>,
        latency: Mutex<Option<Duration>>,
        calls: Mutex<Vec<(CurrencyPair, Option<Timestamp>)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockRateFetcher {
        /// Create a new mock fetcher.
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                rates: DashMap::new(),
                failing: DashMap::new(),
                latency: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        /// Wrap in an `Arc` for sharing with an engine.
        pub fn shared(name: impl Into<String>) -> Arc<Self> {
            Arc::new(Self::new(name))
        }

        /// Add points served for a pair.
        pub fn push_points(&self, pair: &CurrencyPair, points: impl IntoIterator<Item = RatePoint>) {
            self.rates.entry(pair.clone()).or_default().extend(points);
        }

        /// Make every fetch of `pair` fail.
        pub fn fail_pair(&self, pair: &CurrencyPair, message: impl Into<String>) {
            self.failing.insert(pair.clone(), message.into());
        }

        /// Let fetches of `pair` succeed again.
        pub fn recover_pair(&self, pair: &CurrencyPair) {
            self.failing.remove(pair);
        }

        /// Delay every fetch by `latency`.
        pub fn set_latency(&self, latency: Duration) {
            *self.latency.lock() = Some(latency);
        }

        /// Every `(pair, since)` fetched so far.
        pub fn calls(&self) -> Vec<(CurrencyPair, Option<Timestamp>)> {
            self.calls.lock().clone()
        }

        /// Number of fetches of `pair`.
        pub fn call_count(&self, pair: &CurrencyPair) -> usize {
            self.calls.lock().iter().filter(|(p, _)| p == pair).count()
        }

        /// Highest number of fetches observed running at once.
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateFetcher for MockRateFetcher {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(
            &self,
            pair: &CurrencyPair,
            since: Option<Timestamp>,
        ) -> CountervaluesResult<Vec<RatePoint>> {
            self.calls.lock().push((pair.clone(), since));
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            let latency = *self.latency.lock();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let result = match self.failing.get(pair) {
                Some(message) => Err(CountervaluesError::fetch(pair, message.value().clone())),
                None => Ok(self
                    .rates
                    .get(pair)
                    .map(|points| {
                        points
                            .iter()
                            .filter(|p| since.map_or(true, |s| p.timestamp >= s))
                            .copied()
                            .collect()
                    })
                    .unwrap_or_default()),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}
