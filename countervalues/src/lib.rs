//! Countervalues Engine
//!
//! Historical exchange rate cache for portfolio valuation.
//!
//! # Features
//!
//! - Per-pair rate series with nearest-earlier date lookup
//! - Incremental loading through a pluggable [`RateFetcher`]
//! - Single-flight polling with start/stop/poll/wipe control
//! - Snapshot export and import for persistence
//!
//! # Example
//!
//! ```rust,ignore
//! use countervalues::{Countervalues, CountervaluesSettings, CountervalueQuery};
//! use countervalues_common::{Currency, CurrencyPair};
//!
//! let settings = CountervaluesSettings::new([CurrencyPair::new(Currency::btc(), Currency::usd())]);
//! let engine = Countervalues::new(fetcher, settings);
//! engine.start();
//!
//! let query = CountervalueQuery::new(dec!(0.5), Currency::btc(), Currency::usd());
//! let usd = engine.calculate(&query);
//! ```

pub mod calculator;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod polling;
pub mod series;
pub mod settings;
pub mod snapshot;
pub mod state;
pub mod store;

pub use calculator::{calculate, calculate_many, rate_at, BatchQuery, CountervalueQuery, DataPoint};
pub use config::EngineConfig;
pub use engine::Countervalues;
pub use error::{CountervaluesError, CountervaluesResult};
#[cfg(any(test, feature = "test-utils"))]
pub use fetcher::MockRateFetcher;
pub use fetcher::RateFetcher;
pub use loader::{Clock, FetchPlan, LoadBatch, LoadReason, Loader};
pub use polling::{PollPhase, PollingController, PollingStatus};
pub use series::{RatePoint, RateSeries};
pub use settings::CountervaluesSettings;
pub use snapshot::{export_snapshot, import_snapshot, RawSnapshot};
pub use state::{CounterValuesState, PairError, PairErrorKind, PairStatus, StateStats};
pub use store::{RateStore, SharedRateStore};
