//! Per-client admission state.
//!
//! A [`ClientProfile`] bundles everything the engine tracks for one
//! client: the four time-window buckets, the concurrency counter, burst
//! and penalty state, the behavior profile, the adaptive quota, and
//! lifetime counters. Profiles are created lazily on a client's first
//! check and evicted by the background sweep once idle.

use crate::adaptive::AdaptiveQuota;
use crate::behavior::{BehaviorProfile, TrafficPattern};
use crate::bucket::TokenBucket;
use crate::burst::BurstState;
use crate::config::RateLimitPolicy;
use crate::penalty::PenaltyState;

/// Milliseconds in one second.
pub const SECOND_MS: u64 = 1_000;

/// Milliseconds in one minute.
pub const MINUTE_MS: u64 = 60 * SECOND_MS;

/// Milliseconds in one hour.
pub const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Milliseconds in one day.
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Lifetime admission counters for one client.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientStats {
    /// Total checks performed.
    pub total: u64,
    /// Checks that were admitted.
    pub allowed: u64,
    /// Checks that were denied.
    pub denied: u64,
}

impl ClientStats {
    /// Fraction of checks admitted; `0` when no checks have happened.
    pub fn utilization_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.allowed as f64 / self.total as f64
        }
    }

    /// Fraction of checks denied; `0` when no checks have happened.
    pub fn denial_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.denied as f64 / self.total as f64
        }
    }
}

/// All admission state tracked for one client.
#[derive(Debug)]
pub struct ClientProfile {
    /// The client this profile belongs to.
    pub client_id: String,
    /// The tenant the client belongs to.
    pub tenant_id: String,
    /// The policy governing this client.
    pub policy_id: String,
    /// Per-second token bucket.
    pub second: TokenBucket,
    /// Per-minute token bucket.
    pub minute: TokenBucket,
    /// Per-hour token bucket.
    pub hour: TokenBucket,
    /// Per-day token bucket.
    pub day: TokenBucket,
    /// In-flight requests admitted but not yet released.
    pub active_concurrent: u32,
    /// Burst allowance state.
    pub burst: BurstState,
    /// Rolling behavioral profile.
    pub behavior: BehaviorProfile,
    /// Penalty escalation state.
    pub penalty: PenaltyState,
    /// Adaptive quota state.
    pub adaptive: AdaptiveQuota,
    /// Lifetime admission counters.
    pub stats: ClientStats,
    /// When the profile was created, epoch milliseconds.
    pub created_ms: u64,
    /// When the client was last seen, epoch milliseconds.
    pub last_seen_ms: u64,
}

impl ClientProfile {
    /// Creates a fresh profile with all buckets full at the policy's base
    /// quotas.
    pub fn new(
        client_id: &str,
        tenant_id: &str,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
            policy_id: policy.id.clone(),
            second: TokenBucket::new(policy.quota.requests_per_second as f64, now_ms),
            minute: TokenBucket::new(policy.quota.requests_per_minute as f64, now_ms),
            hour: TokenBucket::new(policy.quota.requests_per_hour as f64, now_ms),
            day: TokenBucket::new(policy.quota.requests_per_day as f64, now_ms),
            active_concurrent: 0,
            burst: BurstState::default(),
            behavior: BehaviorProfile::default(),
            penalty: PenaltyState::default(),
            adaptive: AdaptiveQuota::new(now_ms),
            stats: ClientStats::default(),
            created_ms: now_ms,
            last_seen_ms: now_ms,
        }
    }

    /// Takes a read-only snapshot of this profile.
    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            client_id: self.client_id.clone(),
            tenant_id: self.tenant_id.clone(),
            policy_id: self.policy_id.clone(),
            active_concurrent: self.active_concurrent,
            adaptive_factor: self.adaptive.factor(),
            penalty_level: self.penalty.level(),
            total_violations: self.penalty.total_violations(),
            pattern: self.behavior.pattern(),
            anomaly_score: self.behavior.anomaly_score(),
            avg_rps: self.behavior.avg_rps(),
            peak_rps: self.behavior.peak_rps(),
            stats: self.stats,
            created_ms: self.created_ms,
            last_seen_ms: self.last_seen_ms,
        }
    }
}

/// Read-only view of a client profile, decoupled from the live state.
#[derive(Debug, Clone)]
pub struct ProfileSnapshot {
    /// The client this snapshot describes.
    pub client_id: String,
    /// The tenant the client belongs to.
    pub tenant_id: String,
    /// The policy governing this client.
    pub policy_id: String,
    /// In-flight requests at snapshot time.
    pub active_concurrent: u32,
    /// Adaptive quota factor at snapshot time.
    pub adaptive_factor: f64,
    /// Penalty escalation level at snapshot time.
    pub penalty_level: u32,
    /// Lifetime quota violations.
    pub total_violations: u64,
    /// Traffic pattern classification.
    pub pattern: TrafficPattern,
    /// Smoothed anomaly score.
    pub anomaly_score: f64,
    /// Smoothed request rate.
    pub avg_rps: f64,
    /// Peak observed request rate.
    pub peak_rps: f64,
    /// Lifetime admission counters.
    pub stats: ClientStats,
    /// When the profile was created, epoch milliseconds.
    pub created_ms: u64,
    /// When the client was last seen, epoch milliseconds.
    pub last_seen_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_policies;

    #[test]
    fn new_profile_starts_with_full_buckets() {
        let policy = &default_policies()[0];
        let profile = ClientProfile::new("c1", "t1", policy, 0);

        assert_eq!(profile.second.tokens(), 10.0);
        assert_eq!(profile.minute.tokens(), 100.0);
        assert_eq!(profile.hour.tokens(), 1_000.0);
        assert_eq!(profile.day.tokens(), 5_000.0);
        assert_eq!(profile.active_concurrent, 0);
        assert_eq!(profile.adaptive.factor(), 1.0);
    }

    #[test]
    fn stats_rates_are_zero_without_traffic() {
        let stats = ClientStats::default();
        assert_eq!(stats.utilization_rate(), 0.0);
        assert_eq!(stats.denial_rate(), 0.0);
    }

    #[test]
    fn stats_rates_divide_by_total() {
        let stats = ClientStats {
            total: 10,
            allowed: 7,
            denied: 3,
        };
        assert!((stats.utilization_rate() - 0.7).abs() < 1e-9);
        assert!((stats.denial_rate() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn snapshot_copies_identity_and_counters() {
        let policy = &default_policies()[1];
        let mut profile = ClientProfile::new("c9", "acme", policy, 42);
        profile.stats.total = 5;
        profile.stats.allowed = 5;

        let snap = profile.snapshot();
        assert_eq!(snap.client_id, "c9");
        assert_eq!(snap.tenant_id, "acme");
        assert_eq!(snap.policy_id, "pro");
        assert_eq!(snap.stats.total, 5);
        assert_eq!(snap.created_ms, 42);
    }
}
