//! Latest system load sample and the global scaling factor derived from it.
//!
//! Load samples are produced externally and pushed in as partial updates;
//! the monitor keeps only the most recent merged sample (last write wins).
//! The derived load factor shrinks effective quotas as CPU, memory, and
//! error-rate pressure rise, floored so admission never stops entirely.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::now_epoch_ms;

/// Lower bound on the load factor.
const LOAD_FACTOR_FLOOR: f64 = 0.1;

/// The most recent system load sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    /// CPU utilization in `[0, 1]`.
    pub cpu_utilization: f64,
    /// Memory utilization in `[0, 1]`.
    pub memory_utilization: f64,
    /// Depth of the serving queue.
    pub queue_depth: u64,
    /// Recent error rate in `[0, 1]`.
    pub error_rate: f64,
    /// When the sample was stamped, epoch milliseconds.
    pub sampled_at_ms: u64,
}

impl Default for SystemLoad {
    fn default() -> Self {
        Self {
            cpu_utilization: 0.0,
            memory_utilization: 0.0,
            queue_depth: 0,
            error_rate: 0.0,
            sampled_at_ms: 0,
        }
    }
}

/// Partial load update; absent fields keep their previous values.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LoadUpdate {
    /// New CPU utilization, if sampled.
    pub cpu_utilization: Option<f64>,
    /// New memory utilization, if sampled.
    pub memory_utilization: Option<f64>,
    /// New queue depth, if sampled.
    pub queue_depth: Option<u64>,
    /// New error rate, if sampled.
    pub error_rate: Option<f64>,
}

/// Holds the latest externally supplied load sample.
///
/// Updates are rare relative to reads, so a plain `RwLock` suffices;
/// there is no ordering guarantee across concurrent updates beyond
/// last-write-wins.
#[derive(Debug, Default)]
pub struct SystemLoadMonitor {
    current: RwLock<SystemLoad>,
}

impl SystemLoadMonitor {
    /// Creates a monitor with an all-zero (unloaded) sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a partial update into the current sample and stamps it
    /// with the wall clock.
    pub fn update(&self, update: LoadUpdate) {
        self.update_at(update, now_epoch_ms());
    }

    /// Merges a partial update, stamping the given timestamp.
    pub fn update_at(&self, update: LoadUpdate, now_ms: u64) {
        let mut current = self.current.write().expect("load lock poisoned");
        if let Some(cpu) = update.cpu_utilization {
            current.cpu_utilization = cpu;
        }
        if let Some(mem) = update.memory_utilization {
            current.memory_utilization = mem;
        }
        if let Some(depth) = update.queue_depth {
            current.queue_depth = depth;
        }
        if let Some(err) = update.error_rate {
            current.error_rate = err;
        }
        current.sampled_at_ms = now_ms;
    }

    /// Returns a copy of the latest sample.
    pub fn current(&self) -> SystemLoad {
        *self.current.read().expect("load lock poisoned")
    }

    /// Global quota scaling factor:
    /// `max(0.1, 1 - (cpu*0.4 + mem*0.3 + err*0.3))`.
    pub fn load_factor(&self) -> f64 {
        let load = self.current();
        let pressure = load.cpu_utilization * 0.4
            + load.memory_utilization * 0.3
            + load.error_rate * 0.3;
        (1.0 - pressure).max(LOAD_FACTOR_FLOOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unloaded_system_has_unit_factor() {
        let monitor = SystemLoadMonitor::new();
        assert_eq!(monitor.load_factor(), 1.0);
    }

    #[test]
    fn partial_update_preserves_other_fields() {
        let monitor = SystemLoadMonitor::new();
        monitor.update_at(
            LoadUpdate {
                cpu_utilization: Some(0.5),
                ..Default::default()
            },
            100,
        );
        monitor.update_at(
            LoadUpdate {
                memory_utilization: Some(0.4),
                ..Default::default()
            },
            200,
        );

        let load = monitor.current();
        assert_eq!(load.cpu_utilization, 0.5);
        assert_eq!(load.memory_utilization, 0.4);
        assert_eq!(load.sampled_at_ms, 200);
    }

    #[test]
    fn load_factor_weights_components() {
        let monitor = SystemLoadMonitor::new();
        monitor.update_at(
            LoadUpdate {
                cpu_utilization: Some(0.5),
                memory_utilization: Some(0.5),
                error_rate: Some(0.0),
                queue_depth: Some(10),
            },
            0,
        );
        // 1 - (0.5*0.4 + 0.5*0.3) = 0.65
        assert!((monitor.load_factor() - 0.65).abs() < 1e-9);
    }

    #[test]
    fn load_factor_is_floored_under_saturation() {
        let monitor = SystemLoadMonitor::new();
        monitor.update_at(
            LoadUpdate {
                cpu_utilization: Some(1.0),
                memory_utilization: Some(1.0),
                error_rate: Some(1.0),
                queue_depth: None,
            },
            0,
        );
        assert_eq!(monitor.load_factor(), 0.1);
    }
}
