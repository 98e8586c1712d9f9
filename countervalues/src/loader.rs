//! Reconciles a countervalues state with the current settings.
//!
//! A load runs in three steps: plan which tracked pairs need fetching, fetch
//! them concurrently, then apply the outcomes to a state. Fetching never
//! touches a state, so the batch can be applied to whichever version is
//! current when the fetch settles.

use std::sync::Arc;

use countervalues_common::{is_older_than, now, CurrencyPair, Timestamp};
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::error::{CountervaluesError, CountervaluesResult};
use crate::fetcher::RateFetcher;
use crate::series::{RatePoint, RateSeries};
use crate::settings::CountervaluesSettings;
use crate::state::{CounterValuesState, PairError, PairStatus};

/// What triggered a load.
///
/// Ordered by precedence, so coalesced requests keep the strongest reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadReason {
    /// The autopoll timer fired. Pairs inside the freshness window are skipped.
    Scheduled,
    /// An explicit poll. Every tracked pair is fetched.
    Requested,
    /// The settings changed. Every tracked pair is fetched.
    SettingsChanged,
}

impl LoadReason {
    /// Whether pairs fetched within `autopoll_interval` may be skipped.
    pub fn honors_freshness(self) -> bool {
        self == LoadReason::Scheduled
    }
}

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// How a pair is brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// Never fetched successfully: fetch the whole history.
    Full,
    /// Stale or errored: fetch from the latest cached point onward.
    Tail { since: Option<Timestamp> },
    /// Fetched within the freshness window and the load honors it.
    Skip,
}

impl FetchPlan {
    /// Decide the plan for one pair.
    ///
    /// A pair is fresh when its last attempt succeeded less than
    /// `max_age` before `at`. Only scheduled loads skip fresh pairs.
    pub fn for_pair(
        state: &CounterValuesState,
        pair: &CurrencyPair,
        max_age: std::time::Duration,
        at: Timestamp,
        reason: LoadReason,
    ) -> Self {
        let Some(last_success) = state.status(pair).and_then(|s| s.last_success) else {
            return FetchPlan::Full;
        };

        let errored = state.status(pair).map_or(false, PairStatus::is_errored);
        if reason.honors_freshness() && !errored && !is_older_than(last_success, max_age, at) {
            return FetchPlan::Skip;
        }

        FetchPlan::Tail {
            since: state.series(pair).and_then(|s| s.latest()).map(|p| p.timestamp),
        }
    }

    /// `since` argument passed to the fetcher.
    pub fn since(&self) -> Option<Timestamp> {
        match self {
            FetchPlan::Tail { since } => *since,
            _ => None,
        }
    }
}

/// Result of fetching one pair.
#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub pair: CurrencyPair,
    pub plan: FetchPlan,
    pub result: Result<Vec<RatePoint>, CountervaluesError>,
}

/// Fetched outcomes of one load, ready to be applied.
#[derive(Debug, Clone)]
pub struct LoadBatch {
    /// When the fetches settled.
    pub fetched_at: Timestamp,
    pub outcomes: Vec<PairOutcome>,
}

impl LoadBatch {
    /// Number of pairs whose fetch failed.
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Merge the outcomes into `state`, producing a new version.
    ///
    /// Successful pairs get their new points merged and their error cleared.
    /// Failed pairs keep their cached series and get an error status. Pairs
    /// not in the batch are carried over as is.
    pub fn apply_to(&self, state: &CounterValuesState) -> CounterValuesState {
        let mut next = state.clone();

        for outcome in &self.outcomes {
            let previous_status = state.status(&outcome.pair);
            let merged = outcome.result.clone().and_then(|points| {
                let existing = state.series(&outcome.pair).map(Arc::as_ref);
                merge_points(&outcome.pair, existing, points)
            });

            match merged {
                Ok(series) => {
                    if let Some(series) = series {
                        next.data_mut().insert(outcome.pair.clone(), series);
                    }
                    next.status_mut()
                        .insert(outcome.pair.clone(), PairStatus::succeeded(self.fetched_at));
                }
                Err(error) => {
                    warn!(pair = %outcome.pair, error = %error, "Keeping cached rates after failed fetch");
                    let status = PairStatus::failed(
                        previous_status,
                        PairError::from_error(&error, self.fetched_at),
                    );
                    next.status_mut().insert(outcome.pair.clone(), status);
                }
            }
        }

        next
    }
}

/// `None` when there is nothing to store (no cached series, no new points).
fn merge_points(
    pair: &CurrencyPair,
    existing: Option<&RateSeries>,
    points: Vec<RatePoint>,
) -> CountervaluesResult<Option<Arc<RateSeries>>> {
    if points.is_empty() {
        return Ok(None);
    }

    let base = existing.cloned().unwrap_or_default();
    base.merge(points)
        .map(|series| Some(Arc::new(series)))
        .map_err(|violation| CountervaluesError::malformed(pair, violation.to_string()))
}

/// Fetches tracked pairs through a [`RateFetcher`].
pub struct Loader {
    fetcher: Arc<dyn RateFetcher>,
    clock: Clock,
}

impl Loader {
    /// Create a loader over the given fetch source, on the wall clock.
    pub fn new(fetcher: Arc<dyn RateFetcher>) -> Self {
        Self {
            fetcher,
            clock: Arc::new(now),
        }
    }

    /// Use `clock` for freshness checks and fetch timestamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> Timestamp {
        (self.clock)()
    }

    /// Bring `state` up to date with `settings`, skipping fresh pairs.
    pub async fn load(
        &self,
        state: &CounterValuesState,
        settings: &CountervaluesSettings,
    ) -> CountervaluesResult<CounterValuesState> {
        self.load_at(state, settings, self.now()).await
    }

    /// [`Loader::load`] with an explicit time for the freshness check.
    pub async fn load_at(
        &self,
        state: &CounterValuesState,
        settings: &CountervaluesSettings,
        at: Timestamp,
    ) -> CountervaluesResult<CounterValuesState> {
        let batch = self.fetch_at(state, settings, LoadReason::Scheduled, at).await?;
        Ok(batch.apply_to(state))
    }

    /// Fetch what `state` needs for `reason`, without applying it.
    pub async fn fetch(
        &self,
        state: &CounterValuesState,
        settings: &CountervaluesSettings,
        reason: LoadReason,
    ) -> CountervaluesResult<LoadBatch> {
        self.fetch_at(state, settings, reason, self.now()).await
    }

    /// Plan and fetch, deciding freshness as of `at`.
    #[instrument(skip(self, state, settings), fields(source = self.fetcher.name(), tracked = settings.tracked_pairs.len()))]
    pub async fn fetch_at(
        &self,
        state: &CounterValuesState,
        settings: &CountervaluesSettings,
        reason: LoadReason,
        at: Timestamp,
    ) -> CountervaluesResult<LoadBatch> {
        settings.validate()?;

        let planned: Vec<(CurrencyPair, FetchPlan)> = settings
            .tracked_pairs
            .iter()
            .map(|pair| {
                let plan = FetchPlan::for_pair(state, pair, settings.autopoll_interval, at, reason);
                (pair.clone(), plan)
            })
            .filter(|(pair, plan)| {
                if *plan == FetchPlan::Skip {
                    debug!(pair = %pair, "Rates are fresh, skipping fetch");
                    false
                } else {
                    true
                }
            })
            .collect();

        let fetches = planned.into_iter().map(|(pair, plan)| {
            let fetcher = self.fetcher.clone();
            async move {
                let result = fetcher.fetch(&pair, plan.since()).await;
                match &result {
                    Ok(points) => debug!(pair = %pair, ?plan, points = points.len(), "Fetched rates"),
                    Err(e) => warn!(pair = %pair, ?plan, error = %e, "Rate fetch failed"),
                }
                PairOutcome { pair, plan, result }
            }
        });

        let outcomes = join_all(fetches).await;
        let batch = LoadBatch {
            fetched_at: self.now().max(at),
            outcomes,
        };

        info!(
            fetched = batch.outcomes.len(),
            failed = batch.failures(),
            "Countervalues load settled"
        );

        Ok(batch)
    }
}
