//! Background polling controller.
//!
//! A single driver task owns the polling state machine and processes
//! [`PollEvent`]s one at a time, so at most one load is ever in flight.
//! Handles talk to it over an unbounded channel and observe it through a
//! `watch` channel of [`PollingStatus`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use crate::error::CountervaluesError;
use crate::loader::{LoadBatch, LoadReason, Loader};
use crate::settings::CountervaluesSettings;
use crate::state::CounterValuesState;
use crate::store::SharedRateStore;

/// Scheduling state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Not polling automatically. A load started before `stop` may still be pending.
    Idle,
    /// Timer armed for the next automatic poll.
    Scheduled,
    /// One load outstanding.
    Fetching,
}

/// Observable controller status.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingStatus {
    pub phase: PollPhase,
    /// A load is outstanding.
    pub pending: bool,
    /// Failure of the last completed load, if it was not pair-scoped.
    pub error: Option<CountervaluesError>,
    /// Loads settled since the controller was created.
    pub completed_cycles: u64,
}

impl Default for PollingStatus {
    fn default() -> Self {
        Self {
            phase: PollPhase::Idle,
            pending: false,
            error: None,
            completed_cycles: 0,
        }
    }
}

/// Inputs to the polling state machine.
#[derive(Debug)]
enum PollEvent {
    Start,
    Stop,
    Poll,
    SettingsChanged,
    TimerFired,
    Settled {
        generation: u64,
        outcome: Result<LoadBatch, CountervaluesError>,
    },
    Shutdown,
}

/// State shared between the handle and the driver task.
struct Shared {
    store: SharedRateStore,
    loader: Arc<Loader>,
    settings: RwLock<CountervaluesSettings>,
    /// Bumped by every wipe; loads started under an older value are discarded.
    generation: AtomicU64,
}

impl Shared {
    fn wipe(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.store.clear();
        generation
    }

    /// Apply `batch` unless a wipe happened after `generation` was read.
    ///
    /// The generation is compared under the store's write lock, so a wipe
    /// either rejects the batch or clears it afterwards.
    fn commit(&self, generation: u64, batch: &LoadBatch) -> Option<Arc<CounterValuesState>> {
        self.store.update(|current| {
            (generation == self.generation.load(Ordering::Acquire)).then(|| batch.apply_to(current))
        })
    }
}

/// Handle to the polling driver.
///
/// Must be created inside a tokio runtime. Dropping the handle stops the
/// driver; an outstanding load still runs to completion.
pub struct PollingController {
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<PollEvent>,
    status: watch::Receiver<PollingStatus>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl PollingController {
    /// Spawn the driver task. Polling stays idle until [`PollingController::start`].
    pub fn spawn(store: SharedRateStore, loader: Arc<Loader>, settings: CountervaluesSettings) -> Self {
        let shared = Arc::new(Shared {
            store,
            loader,
            settings: RwLock::new(settings),
            generation: AtomicU64::new(0),
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PollingStatus::default());

        let driver = Driver {
            shared: shared.clone(),
            events: events_tx.clone(),
            status: status_tx,
            polling: false,
            in_flight: false,
            queued: None,
            detached: false,
            deadline: None,
            error: None,
            completed_cycles: 0,
        };
        let handle = tokio::spawn(driver.run(events_rx));

        Self {
            shared,
            events: events_tx,
            status: status_rx,
            driver: Mutex::new(Some(handle)),
        }
    }

    /// Begin automatic polling after the initial delay.
    pub fn start(&self) {
        self.send(PollEvent::Start);
    }

    /// Stop automatic polling. An outstanding load is not cancelled.
    pub fn stop(&self) {
        self.send(PollEvent::Stop);
    }

    /// Request a load now; coalesced with any load already in flight.
    pub fn poll(&self) {
        self.send(PollEvent::Poll);
    }

    /// Empty the store immediately.
    ///
    /// A load in flight keeps running but its result is dropped on arrival.
    pub fn wipe(&self) {
        let generation = self.shared.wipe();
        info!(generation, "Countervalues wiped");
    }

    /// Replace the settings; any structural change triggers an immediate load.
    pub fn update_settings(&self, settings: CountervaluesSettings) -> bool {
        let changed = {
            let mut current = self.shared.settings.write();
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        };

        if changed {
            self.send(PollEvent::SettingsChanged);
        }
        changed
    }

    /// Current settings.
    pub fn settings(&self) -> CountervaluesSettings {
        self.shared.settings.read().clone()
    }

    /// Whether a load is outstanding.
    pub fn pending(&self) -> bool {
        self.status.borrow().pending
    }

    /// Failure of the last completed load, if not pair-scoped.
    pub fn error(&self) -> Option<CountervaluesError> {
        self.status.borrow().error.clone()
    }

    /// Current status.
    pub fn status(&self) -> PollingStatus {
        self.status.borrow().clone()
    }

    /// Receive every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<PollingStatus> {
        self.status.clone()
    }

    /// Stop the driver task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.send(PollEvent::Shutdown);
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Polling driver exited abnormally");
            }
        }
    }

    fn send(&self, event: PollEvent) {
        if self.events.send(event).is_err() {
            debug!("Polling driver already stopped, event dropped");
        }
    }
}

impl Drop for PollingController {
    fn drop(&mut self) {
        let _ = self.events.send(PollEvent::Shutdown);
    }
}

/// The state machine, owned by the driver task.
struct Driver {
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<PollEvent>,
    status: watch::Sender<PollingStatus>,
    /// Automatic polling enabled.
    polling: bool,
    /// One load outstanding.
    in_flight: bool,
    /// Strongest reason of the requests that arrived while a load was outstanding.
    queued: Option<LoadReason>,
    /// The outstanding load was started before the last stop.
    detached: bool,
    /// Next automatic poll.
    deadline: Option<Instant>,
    error: Option<CountervaluesError>,
    completed_cycles: u64,
}

impl Driver {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<PollEvent>) {
        debug!("Polling driver started");

        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = wait_until(self.deadline) => PollEvent::TimerFired,
            };

            if matches!(event, PollEvent::Shutdown) {
                break;
            }

            self.handle(event);
            self.publish();
        }

        debug!("Polling driver stopped");
    }

    #[instrument(skip(self), fields(phase = ?self.phase()))]
    fn handle(&mut self, event: PollEvent) {
        match event {
            PollEvent::Start => {
                if !self.polling {
                    self.polling = true;
                    self.detached = false;
                    if !self.in_flight {
                        let delay = self.shared.settings.read().poll_init_delay;
                        self.arm(delay);
                    }
                    debug!("Polling started");
                }
            }
            PollEvent::Stop => {
                self.polling = false;
                self.detached = self.in_flight;
                self.deadline = None;
                debug!("Polling stopped");
            }
            PollEvent::Poll => self.request_load(LoadReason::Requested),
            PollEvent::SettingsChanged => {
                info!("Countervalues settings changed, polling now");
                self.request_load(LoadReason::SettingsChanged);
            }
            PollEvent::TimerFired => {
                self.deadline = None;
                self.request_load(LoadReason::Scheduled);
            }
            PollEvent::Settled { generation, outcome } => self.settle(generation, outcome),
            PollEvent::Shutdown => {}
        }
    }

    fn request_load(&mut self, reason: LoadReason) {
        if self.in_flight {
            debug!(?reason, "Load already in flight, coalescing poll");
            self.queued = Some(self.queued.map_or(reason, |queued| queued.max(reason)));
        } else {
            self.start_load(reason);
        }
    }

    fn start_load(&mut self, reason: LoadReason) {
        self.in_flight = true;
        self.detached = false;
        self.deadline = None;

        let loader = self.shared.loader.clone();
        let state = self.shared.store.get();
        let settings = self.shared.settings.read().clone();
        let generation = self.shared.generation.load(Ordering::Acquire);
        let events = self.events.clone();

        tokio::spawn(async move {
            let load = tokio::spawn(async move { loader.fetch(&state, &settings, reason).await });
            let outcome = match load.await {
                Ok(outcome) => outcome,
                Err(e) => Err(CountervaluesError::Unexpected(format!("load task failed: {}", e))),
            };
            let _ = events.send(PollEvent::Settled { generation, outcome });
        });
    }

    fn settle(&mut self, generation: u64, outcome: Result<LoadBatch, CountervaluesError>) {
        self.in_flight = false;
        self.detached = false;
        self.completed_cycles += 1;

        match outcome {
            Ok(batch) if batch.is_empty() => {
                debug!(cycle = self.completed_cycles, "Every pair is fresh, state unchanged");
                self.error = None;
            }
            Ok(batch) => {
                match self.shared.commit(generation, &batch) {
                    Some(state) => {
                        let stats = state.stats();
                        info!(
                            cycle = self.completed_cycles,
                            pairs = stats.pairs,
                            points = stats.points,
                            errored_pairs = stats.errored_pairs,
                            "Countervalues refreshed"
                        );
                    }
                    None => info!(cycle = self.completed_cycles, "Discarding load result fetched before wipe"),
                }
                self.error = None;
            }
            Err(error) => {
                warn!(cycle = self.completed_cycles, error = %error, "Countervalues load failed");
                self.error = Some(error);
            }
        }

        if self.polling {
            let interval = self.shared.settings.read().autopoll_interval;
            if interval.is_zero() {
                warn!("Autopoll interval is zero, timer not rearmed");
            } else {
                self.arm(interval);
            }
        }

        if let Some(reason) = self.queued.take() {
            self.start_load(reason);
        }
    }

    fn arm(&mut self, after: std::time::Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    fn phase(&self) -> PollPhase {
        if self.in_flight && !self.detached {
            PollPhase::Fetching
        } else if self.polling {
            PollPhase::Scheduled
        } else {
            PollPhase::Idle
        }
    }

    fn publish(&self) {
        let next = PollingStatus {
            phase: self.phase(),
            pending: self.in_flight,
            error: self.error.clone(),
            completed_cycles: self.completed_cycles,
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
