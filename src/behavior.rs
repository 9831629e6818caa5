//! Rolling behavioral profiling per client.
//!
//! Every check, allowed or denied, feeds a short rolling window of request
//! timestamps. From it the profiler derives an instantaneous rate, a
//! smoothed average, a smoothed variance, and an anomaly score that
//! measures how far the current rate sits from the client's own baseline.

use std::collections::VecDeque;

/// Traffic pattern classification derived from smoothed variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficPattern {
    /// Low variance; the client sends at a near-constant rate.
    Steady,
    /// Moderate variance; the rate oscillates.
    Periodic,
    /// High variance; the client sends in spikes.
    Bursty,
    /// Anomaly score exceeds the fixed override threshold.
    Anomalous,
}

impl TrafficPattern {
    /// Returns the lowercase wire tag for this pattern.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Steady => "steady",
            Self::Periodic => "periodic",
            Self::Bursty => "bursty",
            Self::Anomalous => "anomalous",
        }
    }
}

/// Smoothing factor for the average-rate and variance EMAs.
const RATE_EMA_ALPHA: f64 = 0.1;

/// Smoothing factor for the anomaly score EMA.
const ANOMALY_EMA_ALPHA: f64 = 0.05;

/// Variance floor used when normalizing the z-score.
const VARIANCE_FLOOR: f64 = 0.1;

/// Anomaly score above which the pattern is overridden to anomalous.
const ANOMALY_OVERRIDE_SCORE: f64 = 3.0;

/// Variance below which traffic is classified steady.
const STEADY_VARIANCE: f64 = 0.5;

/// Variance above which traffic is classified bursty.
const BURSTY_VARIANCE: f64 = 5.0;

/// Rolling behavioral profile for one client.
#[derive(Debug, Clone)]
pub struct BehaviorProfile {
    /// Request timestamps within the pattern window, oldest first.
    timestamps: VecDeque<u64>,
    /// Exponentially smoothed requests-per-second rate.
    avg_rps: f64,
    /// Highest instantaneous rate observed.
    peak_rps: f64,
    /// Exponentially smoothed absolute deviation of the rate.
    variance: f64,
    /// Exponentially smoothed z-score of the rate.
    anomaly_score: f64,
    /// Current classification.
    pattern: TrafficPattern,
    /// Timestamp of the last update, epoch milliseconds.
    updated_ms: u64,
}

impl Default for BehaviorProfile {
    fn default() -> Self {
        Self {
            timestamps: VecDeque::new(),
            avg_rps: 0.0,
            peak_rps: 0.0,
            variance: 0.0,
            anomaly_score: 0.0,
            pattern: TrafficPattern::Steady,
            updated_ms: 0,
        }
    }
}

impl BehaviorProfile {
    /// Records one request at `now_ms` and refreshes all derived metrics.
    ///
    /// Timestamps older than `window_ms` are pruned first; the
    /// instantaneous rate is the pruned count divided by the window
    /// length in seconds.
    pub fn record(&mut self, now_ms: u64, window_ms: u64) {
        self.timestamps.push_back(now_ms);
        while let Some(&oldest) = self.timestamps.front() {
            if now_ms.saturating_sub(oldest) > window_ms {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        let rps = self.timestamps.len() as f64 / (window_ms as f64 / 1000.0);
        self.avg_rps = self.avg_rps * (1.0 - RATE_EMA_ALPHA) + rps * RATE_EMA_ALPHA;
        self.peak_rps = self.peak_rps.max(rps);

        let deviation = (rps - self.avg_rps).abs();
        self.variance = self.variance * (1.0 - RATE_EMA_ALPHA) + deviation * RATE_EMA_ALPHA;

        let z_score = deviation / self.variance.max(VARIANCE_FLOOR);
        self.anomaly_score =
            self.anomaly_score * (1.0 - ANOMALY_EMA_ALPHA) + z_score * ANOMALY_EMA_ALPHA;

        self.pattern = if self.anomaly_score > ANOMALY_OVERRIDE_SCORE {
            TrafficPattern::Anomalous
        } else if self.variance < STEADY_VARIANCE {
            TrafficPattern::Steady
        } else if self.variance > BURSTY_VARIANCE {
            TrafficPattern::Bursty
        } else {
            TrafficPattern::Periodic
        };
        self.updated_ms = now_ms;
    }

    /// Smoothed requests-per-second rate.
    pub fn avg_rps(&self) -> f64 {
        self.avg_rps
    }

    /// Highest instantaneous rate observed.
    pub fn peak_rps(&self) -> f64 {
        self.peak_rps
    }

    /// Smoothed absolute deviation of the rate.
    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Smoothed anomaly score.
    pub fn anomaly_score(&self) -> f64 {
        self.anomaly_score
    }

    /// Current traffic pattern classification.
    pub fn pattern(&self) -> TrafficPattern {
        self.pattern
    }

    /// Number of timestamps currently inside the pattern window.
    pub fn window_count(&self) -> usize {
        self.timestamps.len()
    }

    /// Timestamp of the last update, epoch milliseconds.
    pub fn updated_ms(&self) -> u64 {
        self.updated_ms
    }

    #[cfg(test)]
    pub(crate) fn force_anomaly_score(&mut self, score: f64) {
        self.anomaly_score = score;
    }
}
