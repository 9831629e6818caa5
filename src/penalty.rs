//! Penalty escalation for repeat quota violators.
//!
//! Quota denials accumulate in a rolling violation counter. When the
//! counter reaches the configured threshold the client is suspended for an
//! exponentially growing duration per escalation level. Recovery steps the
//! level down one at a time, so repeat offenders retain a residual level
//! and re-escalate faster.

use tracing::debug;

use crate::config::PenaltyConfig;

/// Penalty tracking for one client.
#[derive(Debug, Clone, Default)]
pub struct PenaltyState {
    /// Current escalation level; `0` means clear.
    level: u32,
    /// Timestamp the active suspension ends, epoch milliseconds.
    penalty_until_ms: u64,
    /// Rolling violation counter; resets on each escalation.
    violations: u32,
    /// Lifetime violation counter; never resets.
    total_violations: u64,
    /// Timestamp of the most recent violation, epoch milliseconds.
    last_violation_ms: u64,
}

impl PenaltyState {
    /// Records one quota violation, escalating into a timed suspension
    /// when the rolling counter reaches the configured threshold.
    ///
    /// On escalation the level rises by one (capped at
    /// `escalation_steps`), the suspension lasts
    /// `penalty_duration_ms * 2^(level-1)`, and the rolling counter
    /// resets. Returns `true` if this violation caused an escalation.
    pub fn record_violation(&mut self, now_ms: u64, config: &PenaltyConfig) -> bool {
        self.violations += 1;
        self.total_violations += 1;
        self.last_violation_ms = now_ms;

        if !config.enabled || self.violations < config.violation_threshold {
            return false;
        }

        self.level = (self.level + 1).min(config.escalation_steps);
        let duration_ms = config
            .penalty_duration_ms
            .saturating_mul(1u64 << (self.level - 1).min(63));
        self.penalty_until_ms = now_ms + duration_ms;
        self.violations = 0;

        debug!(
            level = self.level,
            duration_ms, "client escalated into penalty"
        );
        true
    }

    /// Returns `true` while the active suspension has not yet elapsed.
    pub fn is_blocked(&self, now_ms: u64) -> bool {
        self.level > 0 && now_ms < self.penalty_until_ms
    }

    /// Returns `true` if the client carries any penalty level, served or
    /// not. The penalty quota multiplier applies while this holds.
    pub fn is_penalized(&self) -> bool {
        self.level > 0
    }

    /// Steps the level down by one once the suspension has elapsed, when
    /// auto-recovery is enabled. The engine invokes this on the first
    /// admitted check after expiry, so a client that keeps violating
    /// retains its residual level and re-escalates from it. The level is
    /// decremented rather than cleared outright. Returns `true` if a
    /// recovery step occurred.
    pub fn try_recover(&mut self, now_ms: u64, config: &PenaltyConfig) -> bool {
        if self.level == 0 || now_ms < self.penalty_until_ms || !config.auto_recovery {
            return false;
        }
        self.level -= 1;
        self.penalty_until_ms = 0;
        debug!(level = self.level, "client recovered one penalty level");
        true
    }

    /// Milliseconds until the active suspension ends.
    pub fn retry_after_ms(&self, now_ms: u64) -> u64 {
        self.penalty_until_ms.saturating_sub(now_ms)
    }

    /// Current escalation level.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Timestamp the active suspension ends, epoch milliseconds.
    pub fn penalty_until_ms(&self) -> u64 {
        self.penalty_until_ms
    }

    /// Rolling violation count since the last escalation.
    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Lifetime violation count.
    pub fn total_violations(&self) -> u64 {
        self.total_violations
    }

    /// Timestamp of the most recent violation, epoch milliseconds.
    pub fn last_violation_ms(&self) -> u64 {
        self.last_violation_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, duration_ms: u64, steps: u32) -> PenaltyConfig {
        PenaltyConfig {
            enabled: true,
            violation_threshold: threshold,
            penalty_multiplier: 0.5,
            penalty_duration_ms: duration_ms,
            escalation_steps: steps,
            auto_recovery: true,
        }
    }

    #[test]
    fn below_threshold_stays_clear() {
        let cfg = config(3, 1_000, 5);
        let mut state = PenaltyState::default();

        assert!(!state.record_violation(0, &cfg));
        assert!(!state.record_violation(1, &cfg));
        assert_eq!(state.level(), 0);
        assert!(!state.is_blocked(2));
        assert_eq!(state.violations(), 2);
        assert_eq!(state.total_violations(), 2);
    }

    #[test]
    fn threshold_escalates_to_level_one_with_base_duration() {
        let cfg = config(3, 1_000, 5);
        let mut state = PenaltyState::default();

        state.record_violation(0, &cfg);
        state.record_violation(0, &cfg);
        assert!(state.record_violation(10, &cfg));

        assert_eq!(state.level(), 1);
        assert_eq!(state.penalty_until_ms(), 1_010);
        assert_eq!(state.violations(), 0);
        assert!(state.is_blocked(500));
        assert_eq!(state.retry_after_ms(500), 510);
    }

    #[test]
    fn second_escalation_doubles_duration() {
        let cfg = config(2, 1_000, 5);
        let mut state = PenaltyState::default();

        state.record_violation(0, &cfg);
        state.record_violation(0, &cfg);
        assert_eq!(state.level(), 1);

        // Serve the penalty, recover to level 0, then reoffend twice.
        // The residual path: recover only decrements by one per serve.
        assert!(state.try_recover(1_000, &cfg));
        assert_eq!(state.level(), 0);

        state.record_violation(2_000, &cfg);
        state.record_violation(2_000, &cfg);
        assert_eq!(state.level(), 1);
        state.try_recover(3_000, &cfg);

        state.record_violation(4_000, &cfg);
        state.record_violation(4_000, &cfg);
        assert_eq!(state.level(), 1);
        // Escalate again without recovering: level 2, duration 2x.
        state.record_violation(4_000, &cfg);
        state.record_violation(4_000, &cfg);
        assert_eq!(state.level(), 2);
        assert_eq!(state.penalty_until_ms(), 4_000 + 2_000);
    }

    #[test]
    fn level_caps_at_escalation_steps() {
        let cfg = config(1, 100, 2);
        let mut state = PenaltyState::default();

        for _ in 0..5 {
            state.record_violation(0, &cfg);
        }
        assert_eq!(state.level(), 2);
    }

    #[test]
    fn recovery_decrements_rather_than_clears() {
        let cfg = config(1, 100, 5);
        let mut state = PenaltyState::default();

        state.record_violation(0, &cfg);
        state.record_violation(0, &cfg);
        state.record_violation(0, &cfg);
        assert_eq!(state.level(), 3);

        let until = state.penalty_until_ms();
        assert!(state.try_recover(until, &cfg));
        assert_eq!(state.level(), 2);
        assert!(state.is_penalized());
        assert!(!state.is_blocked(until));
    }

    #[test]
    fn no_recovery_while_suspension_active() {
        let cfg = config(1, 1_000, 5);
        let mut state = PenaltyState::default();
        state.record_violation(0, &cfg);

        assert!(!state.try_recover(500, &cfg));
        assert_eq!(state.level(), 1);
    }

    #[test]
    fn no_recovery_when_auto_recovery_disabled() {
        let mut cfg = config(1, 100, 5);
        cfg.auto_recovery = false;
        let mut state = PenaltyState::default();
        state.record_violation(0, &cfg);

        assert!(!state.try_recover(10_000, &cfg));
        assert_eq!(state.level(), 1);
    }

    #[test]
    fn disabled_penalties_never_escalate() {
        let mut cfg = config(1, 100, 5);
        cfg.enabled = false;
        let mut state = PenaltyState::default();

        for _ in 0..10 {
            assert!(!state.record_violation(0, &cfg));
        }
        assert_eq!(state.level(), 0);
        assert_eq!(state.total_violations(), 10);
    }
}
