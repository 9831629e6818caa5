//! Closed-loop adjustment of per-client quota factors.
//!
//! The adaptive cycle reads each client's recent utilization, denial rate,
//! and anomaly score, and nudges a bounded multiplier on its base quotas.
//! Anomalous traffic tightens the factor fastest; a high denial rate earns
//! a small raise; persistent under-utilization drifts the factor down.
//! Every change is recorded in a bounded adjustment history.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::AdaptiveConfig;

/// Maximum adjustment records retained per client; oldest evicted first.
pub const ADJUSTMENT_HISTORY_CAP: usize = 100;

/// Denial rate above which the quota factor is raised.
const DENIAL_RATE_RAISE_THRESHOLD: f64 = 0.3;

/// Utilization below which the quota factor drifts down.
const UTILIZATION_DRIFT_THRESHOLD: f64 = 0.5;

/// What drove a quota adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentTrigger {
    /// Anomaly score exceeded the policy threshold; factor reduced.
    Anomaly,
    /// Denial rate was high; factor raised to relieve pressure.
    Behavioral,
    /// Utilization was low; factor drifted down.
    Utilization,
}

impl AdjustmentTrigger {
    /// Returns the lowercase wire tag for this trigger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anomaly => "anomaly",
            Self::Behavioral => "behavioral",
            Self::Utilization => "utilization",
        }
    }
}

/// One recorded change to a client's quota factor.
#[derive(Debug, Clone)]
pub struct QuotaAdjustment {
    /// When the adjustment happened, epoch milliseconds.
    pub at_ms: u64,
    /// Human-readable explanation of the change.
    pub reason: String,
    /// Factor before the adjustment.
    pub old_factor: f64,
    /// Factor after the adjustment.
    pub new_factor: f64,
    /// What drove the adjustment.
    pub trigger: AdjustmentTrigger,
}

/// Per-client adaptive quota state.
#[derive(Debug, Clone)]
pub struct AdaptiveQuota {
    /// Current adjustment factor, always within the policy clamp range.
    factor: f64,
    /// Timestamp of the last applied adjustment, epoch milliseconds.
    last_adjusted_ms: u64,
    /// Bounded history of applied adjustments, oldest first.
    history: VecDeque<QuotaAdjustment>,
}

impl AdaptiveQuota {
    /// Creates a neutral (factor `1.0`) adaptive state. The adjustment
    /// clock starts at `now_ms`, so the first adjustment happens one full
    /// interval after the client is first seen.
    pub fn new(now_ms: u64) -> Self {
        Self {
            factor: 1.0,
            last_adjusted_ms: now_ms,
            history: VecDeque::new(),
        }
    }

    /// Applies at most one adjustment for this cycle.
    ///
    /// Skips clients adjusted within the last `adjustment_interval_ms`.
    /// Decision precedence, first match wins: anomaly above threshold
    /// lowers the factor by `learning_rate * 0.5`; denial rate above 0.3
    /// raises it by `learning_rate * 0.1`; utilization below 0.5 lowers
    /// it by `learning_rate * 0.05`. The factor is clamped to
    /// `[min_quota_fraction, max_quota_multiplier]` on every change.
    /// Returns the trigger if a change was applied.
    pub fn adjust(
        &mut self,
        now_ms: u64,
        utilization_rate: f64,
        denial_rate: f64,
        anomaly_score: f64,
        config: &AdaptiveConfig,
    ) -> Option<AdjustmentTrigger> {
        if now_ms.saturating_sub(self.last_adjusted_ms) < config.adjustment_interval_ms {
            return None;
        }

        let old = self.factor;
        let (new, trigger, reason) = if anomaly_score > config.anomaly_threshold {
            (
                (old - config.learning_rate * 0.5).max(config.min_quota_fraction),
                AdjustmentTrigger::Anomaly,
                format!("anomaly score {anomaly_score:.2} above threshold"),
            )
        } else if denial_rate > DENIAL_RATE_RAISE_THRESHOLD {
            (
                (old + config.learning_rate * 0.1).min(config.max_quota_multiplier),
                AdjustmentTrigger::Behavioral,
                format!("denial rate {denial_rate:.2} above threshold"),
            )
        } else if utilization_rate < UTILIZATION_DRIFT_THRESHOLD {
            (
                (old - config.learning_rate * 0.05).max(config.min_quota_fraction),
                AdjustmentTrigger::Utilization,
                format!("utilization {utilization_rate:.2} below threshold"),
            )
        } else {
            return None;
        };

        let new = new.clamp(config.min_quota_fraction, config.max_quota_multiplier);
        if (new - old).abs() < f64::EPSILON {
            return None;
        }

        self.factor = new;
        self.last_adjusted_ms = now_ms;
        self.history.push_back(QuotaAdjustment {
            at_ms: now_ms,
            reason,
            old_factor: old,
            new_factor: new,
            trigger,
        });
        if self.history.len() > ADJUSTMENT_HISTORY_CAP {
            self.history.pop_front();
        }

        debug!(
            old_factor = old,
            new_factor = new,
            trigger = trigger.as_str(),
            "quota factor adjusted"
        );
        Some(trigger)
    }

    /// Current adjustment factor.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Timestamp of the last applied adjustment, epoch milliseconds.
    pub fn last_adjusted_ms(&self) -> u64 {
        self.last_adjusted_ms
    }

    /// The recorded adjustment history, oldest first.
    pub fn history(&self) -> &VecDeque<QuotaAdjustment> {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig {
            enabled: true,
            learning_rate: 0.1,
            adjustment_interval_ms: 1_000,
            min_quota_fraction: 0.1,
            max_quota_multiplier: 2.0,
            anomaly_threshold: 3.0,
            pattern_window_ms: 10_000,
        }
    }

    #[test]
    fn no_adjustment_inside_interval() {
        let cfg = config();
        let mut quota = AdaptiveQuota::new(0);
        assert_eq!(quota.adjust(500, 0.0, 1.0, 0.0, &cfg), None);
        assert_eq!(quota.factor(), 1.0);
    }

    #[test]
    fn anomaly_takes_precedence_and_lowers_factor() {
        let cfg = config();
        let mut quota = AdaptiveQuota::new(0);

        // Anomaly wins even with a high denial rate.
        let trigger = quota.adjust(1_000, 0.1, 0.9, 5.0, &cfg);
        assert_eq!(trigger, Some(AdjustmentTrigger::Anomaly));
        assert!((quota.factor() - 0.95).abs() < 1e-9);
        assert_eq!(quota.history().len(), 1);
        assert_eq!(quota.history()[0].trigger, AdjustmentTrigger::Anomaly);
    }

    #[test]
    fn high_denial_rate_raises_factor() {
        let cfg = config();
        let mut quota = AdaptiveQuota::new(0);

        let trigger = quota.adjust(1_000, 0.6, 0.4, 0.0, &cfg);
        assert_eq!(trigger, Some(AdjustmentTrigger::Behavioral));
        assert!((quota.factor() - 1.01).abs() < 1e-9);
    }

    #[test]
    fn low_utilization_drifts_factor_down() {
        let cfg = config();
        let mut quota = AdaptiveQuota::new(0);

        let trigger = quota.adjust(1_000, 0.2, 0.0, 0.0, &cfg);
        assert_eq!(trigger, Some(AdjustmentTrigger::Utilization));
        assert!((quota.factor() - 0.995).abs() < 1e-9);
    }

    #[test]
    fn healthy_signals_leave_factor_untouched() {
        let cfg = config();
        let mut quota = AdaptiveQuota::new(0);
        assert_eq!(quota.adjust(1_000, 0.8, 0.1, 0.0, &cfg), None);
        assert_eq!(quota.factor(), 1.0);
        assert!(quota.history().is_empty());
    }

    #[test]
    fn factor_stays_within_policy_bounds() {
        let cfg = config();
        let mut quota = AdaptiveQuota::new(0);

        // Hammer the anomaly branch far past the floor.
        for i in 1..100 {
            quota.adjust(i * 1_000, 0.0, 0.0, 10.0, &cfg);
            assert!(quota.factor() >= cfg.min_quota_fraction);
            assert!(quota.factor() <= cfg.max_quota_multiplier);
        }
        assert!((quota.factor() - cfg.min_quota_fraction).abs() < 1e-9);

        // Then the raise branch up to the ceiling.
        for i in 100..600 {
            quota.adjust(i * 1_000, 0.9, 0.9, 0.0, &cfg);
            assert!(quota.factor() <= cfg.max_quota_multiplier);
        }
    }

    #[test]
    fn saturated_factor_records_no_adjustment() {
        let cfg = config();
        let mut quota = AdaptiveQuota::new(0);

        let mut now = 0;
        loop {
            now += 1_000;
            if quota.adjust(now, 0.0, 0.0, 10.0, &cfg).is_none() {
                break;
            }
        }
        let len_at_floor = quota.history().len();

        // Further anomaly cycles at the floor change nothing.
        assert_eq!(quota.adjust(now + 1_000, 0.0, 0.0, 10.0, &cfg), None);
        assert_eq!(quota.history().len(), len_at_floor);
    }

    #[test]
    fn history_is_capped_fifo() {
        let mut cfg = config();
        cfg.min_quota_fraction = 1e-9;
        cfg.learning_rate = 1e-4;
        let mut quota = AdaptiveQuota::new(0);

        for i in 1..=(ADJUSTMENT_HISTORY_CAP as u64 + 20) {
            let trigger = quota.adjust(i * 1_000, 0.0, 0.0, 10.0, &cfg);
            assert!(trigger.is_some(), "factor must still have room to move");
        }
        assert_eq!(quota.history().len(), ADJUSTMENT_HISTORY_CAP);
        // Oldest record evicted: the first kept record is the 21st.
        assert_eq!(quota.history()[0].at_ms, 21_000);
    }
}
