//! Shared test infrastructure for integration tests.
//!
//! Provides controller constructors and small custom policies tuned for
//! fast, deterministic state transitions. All tests drive the engine
//! through the `*_at` variants with synthetic epoch-millisecond clocks;
//! nothing sleeps.

#![allow(dead_code)]

use tollgate::{
    AdmissionController, BurstConfig, PenaltyConfig, PolicyRegistry, QuotaConfig, RateLimitPolicy,
    Tier,
};

/// Initializes a tracing subscriber for test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// A controller over the four built-in tiers.
pub fn default_controller() -> AdmissionController {
    AdmissionController::with_defaults()
}

/// A controller over a single custom policy.
pub fn controller_with(policy: RateLimitPolicy) -> AdmissionController {
    let registry = PolicyRegistry::new();
    registry.insert(policy).expect("test policy must be valid");
    AdmissionController::new(registry)
}

/// Quotas small enough to exhaust in a handful of checks, with the
/// coarse windows wide enough to stay out of the way.
pub fn tight_quota(requests_per_second: u32) -> QuotaConfig {
    QuotaConfig {
        requests_per_second,
        requests_per_minute: 10_000,
        requests_per_hour: 100_000,
        requests_per_day: 1_000_000,
        tokens_per_request: 1,
        max_concurrent: 1_000,
        max_payload_bytes: 1024 * 1024,
    }
}

/// A policy that denies quickly and escalates quickly: 1 request/sec,
/// penalty after `violation_threshold` denials, 1 s base suspension.
pub fn strict_policy(id: &str, violation_threshold: u32) -> RateLimitPolicy {
    let mut policy = RateLimitPolicy::new(
        id,
        Tier::Custom,
        tight_quota(1),
        BurstConfig::disabled(),
    );
    policy.penalty = PenaltyConfig {
        enabled: true,
        violation_threshold,
        penalty_multiplier: 0.5,
        penalty_duration_ms: 1_000,
        escalation_steps: 3,
        auto_recovery: true,
    };
    policy
}

/// A policy with penalties disabled, for tests that need raw denials
/// without escalation noise.
pub fn lenient_policy(id: &str, requests_per_second: u32) -> RateLimitPolicy {
    let mut policy = RateLimitPolicy::new(
        id,
        Tier::Custom,
        tight_quota(requests_per_second),
        BurstConfig::disabled(),
    );
    policy.penalty.enabled = false;
    policy
}

/// Runs `count` checks for one client at a fixed timestamp and returns
/// how many were admitted.
pub fn drain(
    controller: &AdmissionController,
    client_id: &str,
    policy_id: &str,
    count: usize,
    now_ms: u64,
) -> usize {
    (0..count)
        .filter(|_| {
            controller
                .check_at(client_id, "tenant", policy_id, 1, now_ms)
                .allowed
        })
        .count()
}
