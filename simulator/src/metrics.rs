//! Simulation metrics.

use std::collections::VecDeque;

use countervalues::StateStats;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Load cycles settled.
    pub cycles: u64,
    /// Cycles that ended with a controller error.
    pub failed_cycles: u64,
    /// State snapshots published by the store.
    pub state_updates: u64,
    /// Errored pairs in the latest state.
    pub errored_pairs: usize,
    /// Cached points in the latest state.
    pub points: usize,
    /// Cycle duration samples (ms).
    cycle_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            cycles: 0,
            failed_cycles: 0,
            state_updates: 0,
            errored_pairs: 0,
            points: 0,
            cycle_samples: VecDeque::with_capacity(1000),
            max_samples: 1000,
        }
    }

    /// Record a settled load cycle.
    pub fn record_cycle(&mut self, duration_ms: u64, failed: bool) {
        self.cycles += 1;
        if failed {
            self.failed_cycles += 1;
        }

        if self.cycle_samples.len() >= self.max_samples {
            self.cycle_samples.pop_front();
        }
        self.cycle_samples.push_back(duration_ms);
    }

    /// Record a published state.
    pub fn record_state(&mut self, stats: &StateStats) {
        self.state_updates += 1;
        self.errored_pairs = stats.errored_pairs;
        self.points = stats.points;
    }

    /// Get average cycle duration in ms.
    pub fn average_cycle_ms(&self) -> u64 {
        if self.cycle_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.cycle_samples.iter().sum();
        sum / self.cycle_samples.len() as u64
    }

    /// Get p99 cycle duration.
    pub fn p99_cycle_ms(&self) -> u64 {
        if self.cycle_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.cycle_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * 99 / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Share of cycles that failed.
    pub fn failure_rate(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }

        self.failed_cycles as f64 / self.cycles as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_cycle(100, false);
        metrics.record_cycle(200, false);
        metrics.record_cycle(150, false);
        metrics.record_cycle(50, true);

        assert_eq!(metrics.cycles, 4);
        assert_eq!(metrics.failed_cycles, 1);
        assert_eq!(metrics.average_cycle_ms(), 125);
        assert_eq!(metrics.p99_cycle_ms(), 200);
        assert_eq!(metrics.failure_rate(), 0.25);
    }

    #[test]
    fn test_record_state_keeps_latest() {
        let mut metrics = SimulationMetrics::default();

        metrics.record_state(&StateStats { pairs: 2, points: 10, errored_pairs: 1 });
        metrics.record_state(&StateStats { pairs: 2, points: 12, errored_pairs: 0 });

        assert_eq!(metrics.state_updates, 2);
        assert_eq!(metrics.points, 12);
        assert_eq!(metrics.errored_pairs, 0);
    }
}
