//! Versioned holder for the current countervalues state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use crate::state::CounterValuesState;

/// Holds the current [`CounterValuesState`].
///
/// Snapshots are only ever replaced whole: readers get an `Arc` to a state that
/// never changes underneath them, even while a refresh is being applied.
pub struct RateStore {
    current: RwLock<Arc<CounterValuesState>>,
    version: AtomicU64,
    updates: watch::Sender<Arc<CounterValuesState>>,
}

impl RateStore {
    /// Create a store holding the empty state.
    pub fn new() -> Self {
        Self::with_state(CounterValuesState::new())
    }

    /// Create a store holding `state`.
    pub fn with_state(state: CounterValuesState) -> Self {
        let state = Arc::new(state);
        let (updates, _) = watch::channel(state.clone());
        Self {
            current: RwLock::new(state),
            version: AtomicU64::new(0),
            updates,
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<CounterValuesState> {
        self.current.read().clone()
    }

    /// Replace the current snapshot.
    pub fn set(&self, next: impl Into<Arc<CounterValuesState>>) {
        let next = next.into();
        let version = {
            let mut current = self.current.write();
            *current = next.clone();
            self.version.fetch_add(1, Ordering::AcqRel) + 1
        };

        debug!(version, pairs = next.data().len(), "Countervalues state replaced");
        self.updates.send_replace(next);
    }

    /// Replace the current snapshot with one derived from it.
    ///
    /// The derivation runs under the write lock, so no other `set` can land
    /// between reading and replacing. Returning `None` leaves the snapshot and
    /// version untouched and notifies no one.
    pub fn update<F>(&self, f: F) -> Option<Arc<CounterValuesState>>
    where
        F: FnOnce(&CounterValuesState) -> Option<CounterValuesState>,
    {
        let (next, version) = {
            let mut current = self.current.write();
            let next = Arc::new(f(&current)?);
            *current = next.clone();
            (next, self.version.fetch_add(1, Ordering::AcqRel) + 1)
        };

        debug!(version, pairs = next.data().len(), "Countervalues state updated");
        self.updates.send_replace(next.clone());
        Some(next)
    }

    /// Reset to the empty state.
    pub fn clear(&self) {
        self.set(CounterValuesState::new());
    }

    /// Number of replacements since creation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Receive every future snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CounterValuesState>> {
        self.updates.subscribe()
    }
}

impl Default for RateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared rate store.
pub type SharedRateStore = Arc<RateStore>;
