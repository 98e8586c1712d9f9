//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use countervalues::{CounterValuesState, Countervalues, CountervaluesSettings, PollPhase, PollingStatus};
use countervalues_common::CurrencyPair;

use crate::feed::SimulatedFeed;
use crate::metrics::SimulationMetrics;
use crate::report::{build_report, log_report};
use crate::scenario::{Scenario, ScenarioStep};

/// Historical dates sampled per pair in a report.
const REPORT_SAMPLES: usize = 5;

/// Drives an engine against a simulated feed.
pub struct SimulationController {
    engine: Arc<Countervalues>,
    feed: Arc<SimulatedFeed>,
    metrics: Arc<Mutex<SimulationMetrics>>,
    observer: JoinHandle<()>,
    /// Settled cycle count when the oldest unawaited load was requested.
    requested_at: Mutex<Option<u64>>,
}

impl SimulationController {
    /// Create a controller and start observing the engine.
    pub fn new(engine: Countervalues, feed: Arc<SimulatedFeed>) -> Self {
        let engine = Arc::new(engine);
        let metrics = Arc::new(Mutex::new(SimulationMetrics::new()));
        let observer = tokio::spawn(observe(
            engine.subscribe_status(),
            engine.subscribe(),
            metrics.clone(),
        ));

        Self {
            engine,
            feed,
            metrics,
            observer,
            requested_at: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Countervalues {
        &self.engine
    }

    /// Run a scenario.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        Ok(())
    }

    /// Poll automatically until `duration` elapses, or until Ctrl+C.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");

        self.engine.start();

        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::signal::ctrl_c().await?,
        }

        self.engine.stop();
        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                info!("Waiting {}ms", millis);
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::Start => {
                self.mark_requested();
                self.engine.start();
            }
            ScenarioStep::Stop => self.engine.stop(),
            ScenarioStep::Poll => {
                self.mark_requested();
                self.engine.poll();
            }
            ScenarioStep::Wipe => {
                info!("Wiping countervalues");
                self.engine.wipe();
            }
            ScenarioStep::TrackPairs { pairs } => {
                let pairs = pairs
                    .iter()
                    .map(|key| CurrencyPair::from_key(key))
                    .collect::<Result<Vec<_>, _>>()?;
                let current = self.engine.settings();
                let settings = CountervaluesSettings::new(pairs)
                    .with_autopoll_interval(current.autopoll_interval)
                    .with_poll_init_delay(current.poll_init_delay);

                self.mark_requested();
                let changed = self.engine.update_settings(settings);
                if !changed {
                    self.requested_at.lock().take();
                }
                info!(changed, "Updated tracked pairs");
            }
            ScenarioStep::SetFailureRate { rate } => {
                self.feed.set_failure_rate(*rate);
                info!(rate = self.feed.failure_rate(), "Set provider failure rate");
            }
            ScenarioStep::AwaitIdle { timeout_ms } => {
                // Events reach the driver asynchronously, so a fresh request may
                // not show as pending yet. Wait for a cycle to settle after it.
                let baseline = self.requested_at.lock().take();
                let mut status = self.engine.subscribe_status();
                let idle = tokio::time::timeout(
                    Duration::from_millis(*timeout_ms),
                    status.wait_for(|s| !s.pending && baseline.map_or(true, |b| s.completed_cycles > b)),
                )
                .await;

                match idle {
                    Ok(Ok(_)) => {}
                    Ok(Err(_)) => anyhow::bail!("Engine stopped while waiting for idle"),
                    Err(_) => warn!("Timed out after {}ms waiting for idle", timeout_ms),
                }
            }
            ScenarioStep::Report => self.report(),
        }

        Ok(())
    }

    fn mark_requested(&self) {
        let cycles = self.engine.status().completed_cycles;
        self.requested_at.lock().get_or_insert(cycles);
    }

    /// Log a countervalue report for the current state.
    pub fn report(&self) {
        let report = build_report(&self.engine.state(), &self.engine.settings(), REPORT_SAMPLES);
        log_report(&report);
    }

    /// Stop the engine and the observer.
    pub async fn shutdown(self) -> SimulationMetrics {
        self.engine.shutdown().await;
        self.observer.abort();
        let metrics = self.metrics.lock().clone();
        metrics
    }
}

/// Record cycles and state updates as the engine publishes them.
async fn observe(
    mut status: watch::Receiver<PollingStatus>,
    mut states: watch::Receiver<Arc<CounterValuesState>>,
    metrics: Arc<Mutex<SimulationMetrics>>,
) {
    let mut seen_cycles = status.borrow().completed_cycles;
    let mut fetch_started: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();

                if current.completed_cycles > seen_cycles {
                    seen_cycles = current.completed_cycles;
                    let elapsed = fetch_started
                        .take()
                        .map_or(0, |started| started.elapsed().as_millis() as u64);
                    metrics.lock().record_cycle(elapsed, current.error.is_some());
                    if let Some(error) = &current.error {
                        warn!(error = %error, "Load cycle failed");
                    }
                }

                if current.phase == PollPhase::Fetching && fetch_started.is_none() {
                    fetch_started = Some(Instant::now());
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let stats = states.borrow_and_update().stats();
                metrics.lock().record_state(&stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use countervalues_common::Currency;

    fn controller(seed: u64) -> SimulationController {
        let feed = Arc::new(
            SimulatedFeed::new(Some(seed))
                .with_history(20)
                .with_latency(Duration::from_millis(10)),
        );
        let settings = CountervaluesSettings::new([CurrencyPair::new(Currency::btc(), Currency::usd())])
            .with_autopoll_interval(Duration::from_secs(60));
        let engine = Countervalues::new(feed.clone(), settings);
        SimulationController::new(engine, feed)
    }

    #[tokio::test]
    async fn test_steady_scenario_fills_cache() {
        let controller = controller(11);
        let scenario = Scenario {
            name: "short".to_string(),
            description: "poll once".to_string(),
            steps: vec![
                ScenarioStep::Poll,
                ScenarioStep::AwaitIdle { timeout_ms: 2_000 },
                ScenarioStep::Report,
            ],
        };

        controller.run_scenario(&scenario).await.unwrap();

        let state = controller.engine().state();
        assert_eq!(state.stats().pairs, 1);
        assert!(state.stats().points >= 20);

        let metrics = controller.shutdown().await;
        assert_eq!(metrics.failed_cycles, 0);
    }

    #[tokio::test]
    async fn test_track_pairs_step_updates_settings() {
        let controller = controller(12);
        let step = ScenarioStep::TrackPairs {
            pairs: vec!["ETH/EUR".to_string()],
        };

        controller.execute_step(&step).await.unwrap();
        controller
            .execute_step(&ScenarioStep::AwaitIdle { timeout_ms: 2_000 })
            .await
            .unwrap();

        let eth_eur = CurrencyPair::new(Currency::eth(), Currency::eur());
        assert!(controller.engine().settings().tracks(&eth_eur));
        assert!(controller.engine().state().series(&eth_eur).is_some());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_pair_key_fails_step() {
        let controller = controller(13);
        let step = ScenarioStep::TrackPairs {
            pairs: vec!["ETHEUR".to_string()],
        };

        assert!(controller.execute_step(&step).await.is_err());
        controller.shutdown().await;
    }
}
