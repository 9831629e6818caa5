//! Integration tests for the closed-loop adaptive cycle.
//!
//! All timelines are synthetic: clients are driven with `check_at` and
//! the cycle with `run_adaptive_cycle` at explicit timestamps. The
//! default adjustment interval is one minute, so cycles run at
//! minute-plus offsets from the client's first check.

mod common;

use common::*;

#[test]
fn denial_heavy_client_earns_a_quota_raise() {
    init_tracing();
    let controller = controller_with(lenient_policy("lenient", 1));

    // One admitted, nine denied: denial rate 0.9.
    assert_eq!(drain(&controller, "c1", "lenient", 10, 1_000), 1);

    controller.run_adaptive_cycle(61_000);

    let profile = controller.get_client_profile("c1").unwrap();
    assert!((profile.adaptive_factor - 1.01).abs() < 1e-9);

    // The raised factor widens the effective per-second limit from 1
    // to ceil(1 * 1.01) = 2 on the next check.
    let decision = controller.check_at("c1", "t1", "lenient", 1, 100_000);
    assert!(decision.allowed);
    assert_eq!(decision.limits.second, 2);
    assert!((decision.adaptive_factor - 1.01).abs() < 1e-9);
    assert_eq!(decision.header("X-RateLimit-Limit-Second"), Some("2"));
}

#[test]
fn no_adjustment_inside_the_interval() {
    init_tracing();
    let controller = controller_with(lenient_policy("lenient", 1));

    drain(&controller, "c1", "lenient", 10, 1_000);

    // 49 s since the client was first seen: under the one-minute gate.
    controller.run_adaptive_cycle(50_000);

    let profile = controller.get_client_profile("c1").unwrap();
    assert_eq!(profile.adaptive_factor, 1.0);
}

#[test]
fn anomalous_traffic_lowers_the_factor() {
    init_tracing();
    // Hammering one timestamp keeps the instantaneous rate far from the
    // smoothed baseline; a sensitive threshold lets the cycle act on it.
    let mut policy = lenient_policy("edge", 1_000);
    policy.adaptive.anomaly_threshold = 0.5;
    let controller = controller_with(policy);

    for _ in 0..100 {
        let decision = controller.check_at("c1", "t1", "edge", 1, 1_000);
        assert!(decision.allowed);
        controller.release("c1");
    }

    controller.run_adaptive_cycle(61_000);

    // Anomaly takes precedence even though nothing was denied:
    // factor = 1.0 - learning_rate * 0.5 = 0.95.
    let profile = controller.get_client_profile("c1").unwrap();
    assert!(profile.anomaly_score > 0.5);
    assert!((profile.adaptive_factor - 0.95).abs() < 1e-9);
}

#[test]
fn healthy_traffic_leaves_the_factor_neutral() {
    init_tracing();
    let controller = controller_with(lenient_policy("lenient", 1));

    // One admitted request per second: full utilization, no denials,
    // negligible anomaly score.
    for i in 0..100u64 {
        let decision = controller.check_at("c1", "t1", "lenient", 1, i * 1_000);
        assert!(decision.allowed);
        controller.release("c1");
    }

    controller.run_adaptive_cycle(200_000);

    let profile = controller.get_client_profile("c1").unwrap();
    assert_eq!(profile.adaptive_factor, 1.0);
    assert!(profile.anomaly_score < 0.5);
}

#[test]
fn disabled_adaptive_policy_is_skipped() {
    init_tracing();
    let mut policy = lenient_policy("frozen", 1);
    policy.adaptive.enabled = false;
    let controller = controller_with(policy);

    drain(&controller, "c1", "frozen", 10, 1_000);
    controller.run_adaptive_cycle(61_000);

    let profile = controller.get_client_profile("c1").unwrap();
    assert_eq!(profile.adaptive_factor, 1.0);
}

#[test]
fn factor_saturates_at_the_policy_ceiling() {
    init_tracing();
    let controller = controller_with(lenient_policy("lenient", 1));

    // Freeze a 0.9 denial rate, then run cycles an interval apart. Each
    // applies a 0.01 raise until the 2.0 ceiling clamps the factor.
    drain(&controller, "c1", "lenient", 10, 1_000);

    for i in 0..120u64 {
        controller.run_adaptive_cycle(61_000 + i * 60_000);
        let profile = controller.get_client_profile("c1").unwrap();
        assert!(profile.adaptive_factor <= 2.0);
    }

    let profile = controller.get_client_profile("c1").unwrap();
    assert_eq!(profile.adaptive_factor, 2.0);
}
