//! The countervalues service object.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::calculator::{self, BatchQuery, CountervalueQuery, DataPoint};
use crate::config::EngineConfig;
use crate::error::CountervaluesError;
use crate::fetcher::RateFetcher;
use crate::loader::Loader;
use crate::polling::{PollingController, PollingStatus};
use crate::settings::CountervaluesSettings;
use crate::snapshot::{export_snapshot, import_snapshot, RawSnapshot};
use crate::state::CounterValuesState;
use crate::store::{RateStore, SharedRateStore};

/// A countervalues engine: rate store, polling controller and read surface.
///
/// Any number of observers can attach through [`Countervalues::subscribe`] and
/// [`Countervalues::subscribe_status`]. Must be created inside a tokio runtime.
pub struct Countervalues {
    store: SharedRateStore,
    controller: PollingController,
}

impl Countervalues {
    /// Create an idle engine with an empty store.
    pub fn new(fetcher: Arc<dyn RateFetcher>, settings: CountervaluesSettings) -> Self {
        let store = Arc::new(RateStore::new());
        let loader = Arc::new(Loader::new(fetcher));
        let controller = PollingController::spawn(store.clone(), loader, settings);
        Self { store, controller }
    }

    /// Create an idle engine seeded from a saved snapshot.
    ///
    /// A snapshot without any pair status is ignored.
    pub fn with_snapshot(
        fetcher: Arc<dyn RateFetcher>,
        settings: CountervaluesSettings,
        snapshot: &RawSnapshot,
    ) -> Self {
        let engine = Self::new(fetcher, settings);
        if !snapshot.is_empty() {
            engine.import(snapshot);
        }
        engine
    }

    /// Create an engine from configuration, starting it if configured to.
    pub fn from_config(fetcher: Arc<dyn RateFetcher>, config: &EngineConfig) -> Self {
        let engine = Self::new(fetcher, config.settings());
        if config.autostart {
            engine.start();
        }
        engine
    }

    // --- Read surface ---

    /// Current state snapshot.
    pub fn state(&self) -> Arc<CounterValuesState> {
        self.store.get()
    }

    /// Receive every new state snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CounterValuesState>> {
        self.store.subscribe()
    }

    /// Number of state replacements so far.
    pub fn version(&self) -> u64 {
        self.store.version()
    }

    /// Convert against the current state.
    pub fn calculate(&self, query: &CountervalueQuery) -> Option<Decimal> {
        calculator::calculate(&self.state(), query)
    }

    /// Convert many data points against the current state.
    pub fn calculate_many(&self, points: &[DataPoint], query: &BatchQuery) -> Vec<Option<Decimal>> {
        calculator::calculate_many(&self.state(), points, query)
    }

    // --- Persistence surface ---

    /// Export the current state.
    pub fn export(&self) -> RawSnapshot {
        export_snapshot(&self.state())
    }

    /// Replace the current state with a snapshot filtered by the current settings.
    #[instrument(skip(self, snapshot), fields(entries = snapshot.data.len()))]
    pub fn import(&self, snapshot: &RawSnapshot) {
        let state = import_snapshot(snapshot, &self.controller.settings());
        let stats = state.stats();
        self.store.set(state);
        info!(pairs = stats.pairs, points = stats.points, "Imported countervalues");
    }

    // --- Controller surface ---

    pub fn start(&self) {
        self.controller.start();
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn poll(&self) {
        self.controller.poll();
    }

    pub fn wipe(&self) {
        self.controller.wipe();
    }

    /// Replace settings; returns whether they changed (and a poll was triggered).
    pub fn update_settings(&self, settings: CountervaluesSettings) -> bool {
        self.controller.update_settings(settings)
    }

    pub fn settings(&self) -> CountervaluesSettings {
        self.controller.settings()
    }

    pub fn pending(&self) -> bool {
        self.controller.pending()
    }

    pub fn error(&self) -> Option<CountervaluesError> {
        self.controller.error()
    }

    pub fn status(&self) -> PollingStatus {
        self.controller.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PollingStatus> {
        self.controller.subscribe_status()
    }

    /// Stop the polling driver.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::MockRateFetcher;
    use crate::series::RatePoint;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use countervalues_common::{Currency, CurrencyPair, Timestamp};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn day(n: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::days(n)
    }

    fn btc_usd() -> CurrencyPair {
        CurrencyPair::new(Currency::btc(), Currency::usd())
    }

    fn eth_usd() -> CurrencyPair {
        CurrencyPair::new(Currency::eth(), Currency::usd())
    }

    fn settings(pairs: impl IntoIterator<Item = CurrencyPair>) -> CountervaluesSettings {
        CountervaluesSettings::new(pairs).with_autopoll_interval(Duration::from_secs(60))
    }

    fn fetcher() -> Arc<MockRateFetcher> {
        let fetcher = MockRateFetcher::shared("test");
        fetcher.push_points(
            &btc_usd(),
            vec![RatePoint::new(day(1), dec!(10000)), RatePoint::new(day(3), dec!(12000))],
        );
        fetcher.push_points(&eth_usd(), vec![RatePoint::new(day(1), dec!(500))]);
        fetcher
    }

    async fn settle(engine: &Countervalues, cycles: u64) {
        engine
            .subscribe_status()
            .wait_for(|s| s.completed_cycles >= cycles && !s.pending)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_btc_usd_lookup_scenario() {
        let engine = Countervalues::new(fetcher(), settings([btc_usd()]));
        engine.poll();
        settle(&engine, 1).await;

        let q = |d: i64| CountervalueQuery::new(dec!(1), Currency::btc(), Currency::usd()).with_date(day(d));
        assert_eq!(engine.calculate(&q(2)), Some(dec!(10000)));
        assert_eq!(engine.calculate(&q(4)), Some(dec!(12000)));
        assert_eq!(engine.calculate(&q(0)), Some(dec!(10000)));

        let points = [DataPoint::new(dec!(2), Some(day(2))), DataPoint::new(dec!(1), None)];
        let batch = BatchQuery::new(Currency::btc(), Currency::usd());
        assert_eq!(engine.calculate_many(&points, &batch), vec![Some(dec!(20000)), Some(dec!(12000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_controller_error_unset() {
        let fetcher = fetcher();
        let engine = Countervalues::new(fetcher.clone(), settings([btc_usd(), eth_usd()]));
        engine.poll();
        settle(&engine, 1).await;
        let before = engine.state();

        fetcher.fail_pair(&eth_usd(), "provider down");
        fetcher.push_points(&btc_usd(), vec![RatePoint::new(day(4), dec!(13000))]);
        // Force a refetch of both pairs.
        engine.import(&export_with_stale_status(&before));
        engine.poll();
        settle(&engine, 2).await;

        let after = engine.state();
        assert_eq!(after.series(&btc_usd()).unwrap().latest().unwrap().rate, dec!(13000));
        assert_eq!(after.series(&eth_usd()), before.series(&eth_usd()));
        assert!(after.status(&eth_usd()).unwrap().is_errored());
        assert!(engine.error().is_none());
    }

    /// Export `state` with every last success pushed far into the past.
    fn export_with_stale_status(state: &CounterValuesState) -> RawSnapshot {
        let mut raw = export_snapshot(state);
        for status in raw.status.values_mut() {
            status["last_success"] = serde_json::json!("2000-01-01T00:00:00Z");
        }
        raw
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_import_roundtrip_preserves_calculations() {
        let source = Countervalues::new(fetcher(), settings([btc_usd(), eth_usd()]));
        source.poll();
        settle(&source, 1).await;

        let json = source.export().to_json().unwrap();
        let restored = Countervalues::with_snapshot(
            MockRateFetcher::shared("unused"),
            settings([btc_usd()]),
            &RawSnapshot::from_json(&json).unwrap(),
        );

        for d in 0..5 {
            let q = CountervalueQuery::new(dec!(0.5), Currency::btc(), Currency::usd()).with_date(day(d));
            assert_eq!(restored.calculate(&q), source.calculate(&q));
        }
        let eth = CountervalueQuery::new(dec!(1), Currency::eth(), Currency::usd());
        assert_eq!(restored.calculate(&eth), None);
        assert!(source.calculate(&eth).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_snapshot_is_ignored() {
        let engine = Countervalues::with_snapshot(fetcher(), settings([btc_usd()]), &RawSnapshot::default());
        assert_eq!(engine.version(), 0);
        assert!(engine.state().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wipe_makes_everything_unknown() {
        let engine = Countervalues::new(fetcher(), settings([btc_usd()]));
        engine.poll();
        settle(&engine, 1).await;
        let q = CountervalueQuery::new(dec!(1), Currency::btc(), Currency::usd());
        assert!(engine.calculate(&q).is_some());

        engine.wipe();

        assert_eq!(engine.calculate(&q), None);
        assert!(engine.export().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_receive_new_states() {
        let engine = Countervalues::new(fetcher(), settings([btc_usd()]));
        let mut states = engine.subscribe();

        engine.poll();
        states.changed().await.unwrap();

        assert!(states.borrow().series(&btc_usd()).is_some());
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config_autostarts() {
        let config = EngineConfig {
            tracked_pairs: vec![btc_usd()],
            poll_init_delay: Duration::from_millis(10),
            ..Default::default()
        };

        let engine = Countervalues::from_config(fetcher(), &config);
        settle(&engine, 1).await;

        assert!(engine.state().series(&btc_usd()).is_some());
        assert_eq!(engine.settings(), config.settings());
    }
}
