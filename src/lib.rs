//! Adaptive admission control: per-tier token-bucket quotas that are
//! continuously recalibrated from observed client behavior and system
//! load.
//!
//! The crate decides, for every inbound unit of work, whether to admit,
//! throttle, or reject it. Admission runs through four time-window token
//! buckets plus a concurrency gate, scaled by a per-client adaptive
//! factor, the global load factor, and any active penalty multiplier.
//! Repeat violators escalate into exponentially growing suspensions; a
//! rolling behavioral profiler feeds an anomaly score back into the
//! closed-loop quota adjuster.
//!
//! Transport, persistence, and load sampling are external: the caller
//! invokes [`AdmissionController::check`] per request, pairs each
//! admission with [`AdmissionController::release`], and pushes load
//! samples in via [`AdmissionController::update_system_load`].

use std::time::{SystemTime, UNIX_EPOCH};

pub mod adaptive;
pub mod behavior;
pub mod bucket;
pub mod burst;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod load;
pub mod penalty;
pub mod policy;
pub mod profile;

pub use adaptive::{AdaptiveQuota, AdjustmentTrigger, QuotaAdjustment};
pub use behavior::{BehaviorProfile, TrafficPattern};
pub use bucket::TokenBucket;
pub use burst::BurstState;
pub use config::{
    default_policies, AdaptiveConfig, BurstConfig, FairnessConfig, PenaltyConfig, PolicyFile,
    PolicyUpdate, QuotaConfig, RateLimitPolicy, Tier,
};
pub use decision::{Decision, DenyReason, EffectiveLimits, RemainingQuota};
pub use engine::{spawn_adaptive_cycle, AdmissionController, EngineStats, ThrottledClient};
pub use error::AdmissionError;
pub use load::{LoadUpdate, SystemLoad, SystemLoadMonitor};
pub use penalty::PenaltyState;
pub use policy::PolicyRegistry;
pub use profile::{ClientProfile, ClientStats, ProfileSnapshot};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Current wall-clock time in epoch milliseconds.
///
/// All core operations also accept an explicit timestamp (`*_at`
/// variants) so tests and replay tooling can inject deterministic time.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
