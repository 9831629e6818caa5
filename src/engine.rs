//! The admission controller: the hot check/release path, the background
//! adaptive cycle, and engine-wide statistics.
//!
//! One controller instance is constructed at process startup and shared
//! via `Arc`; there is no global singleton. Client profiles live in a
//! sharded concurrent map with one mutex per profile, so checks for
//! different clients never contend on a shared lock. The adaptive cycle
//! and the idle-profile sweep run from a background task and take each
//! profile lock only briefly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::RateLimitPolicy;
use crate::decision::{Decision, DenyReason, EffectiveLimits, RemainingQuota};
use crate::load::{LoadUpdate, SystemLoad, SystemLoadMonitor};
use crate::policy::PolicyRegistry;
use crate::profile::{ClientProfile, ProfileSnapshot, DAY_MS, HOUR_MS, MINUTE_MS, SECOND_MS};
use crate::{now_epoch_ms, PolicyUpdate, Result};

/// Default idle time after which a client profile is evicted: one hour.
pub const DEFAULT_PROFILE_TTL_MS: u64 = 3_600_000;

/// Advisory retry-after reported on concurrency denials, which have no
/// refill schedule of their own.
const CONCURRENCY_RETRY_MS: u64 = 1_000;

/// Maximum entries reported in the top-throttled list.
const TOP_THROTTLED_LIMIT: usize = 10;

/// A client and its lifetime denial count, for the top-throttled list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottledClient {
    /// The throttled client.
    pub client_id: String,
    /// Lifetime denied checks for that client.
    pub denied: u64,
}

/// Engine-wide statistics snapshot.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Number of tracked client profiles.
    pub total_clients: usize,
    /// Number of registered policies.
    pub active_policies: usize,
    /// Fraction of all checks admitted.
    pub global_allow_rate: f64,
    /// Fraction of all checks denied.
    pub global_deny_rate: f64,
    /// Up to ten clients with the most denials, most throttled first.
    pub top_throttled: Vec<ThrottledClient>,
    /// Clients currently carrying penalty level.
    pub penalized_clients: usize,
    /// Clients with an open burst window.
    pub bursting_clients: usize,
    /// Clients classified anomalous.
    pub anomalous_clients: usize,
    /// The latest system load sample.
    pub system_load: SystemLoad,
}

/// The adaptive admission-control core.
pub struct AdmissionController {
    policies: PolicyRegistry,
    profiles: DashMap<String, Arc<Mutex<ClientProfile>>>,
    load: SystemLoadMonitor,
    total_allowed: AtomicU64,
    total_denied: AtomicU64,
    profile_ttl_ms: u64,
}

impl AdmissionController {
    /// Creates a controller over the given policy registry.
    pub fn new(policies: PolicyRegistry) -> Self {
        Self {
            policies,
            profiles: DashMap::new(),
            load: SystemLoadMonitor::new(),
            total_allowed: AtomicU64::new(0),
            total_denied: AtomicU64::new(0),
            profile_ttl_ms: DEFAULT_PROFILE_TTL_MS,
        }
    }

    /// Creates a controller with the four built-in policy tiers.
    pub fn with_defaults() -> Self {
        Self::new(PolicyRegistry::with_defaults())
    }

    /// Overrides the idle time after which profiles are evicted.
    pub fn with_profile_ttl(mut self, ttl_ms: u64) -> Self {
        self.profile_ttl_ms = ttl_ms;
        self
    }

    /// The policy registry backing this controller.
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// Decides whether to admit one unit of work, stamping the wall clock.
    ///
    /// `weight` is the token cost of the request; pass `0` to use the
    /// policy's `tokens_per_request`.
    pub fn check(
        &self,
        client_id: &str,
        tenant_id: &str,
        policy_id: &str,
        weight: u32,
    ) -> Decision {
        self.check_at(client_id, tenant_id, policy_id, weight, now_epoch_ms())
    }

    /// [`Self::check`] with an explicit timestamp, for deterministic tests
    /// and replay.
    pub fn check_at(
        &self,
        client_id: &str,
        tenant_id: &str,
        policy_id: &str,
        weight: u32,
        now_ms: u64,
    ) -> Decision {
        let Some(policy) = self.policies.get(policy_id) else {
            warn!(policy_id, client_id, "check against unknown policy");
            self.total_denied.fetch_add(1, Ordering::Relaxed);
            return Decision::policy_not_found(policy_id, now_ms);
        };

        let weight = if weight == 0 {
            policy.quota.tokens_per_request
        } else {
            weight
        } as f64;

        let entry = Arc::clone(
            &self
                .profiles
                .entry(client_id.to_string())
                .or_insert_with(|| {
                    debug!(client_id, policy_id, "creating client profile");
                    Arc::new(Mutex::new(ClientProfile::new(
                        client_id, tenant_id, &policy, now_ms,
                    )))
                }),
        );
        let mut profile = entry.lock().expect("profile lock poisoned");

        profile.last_seen_ms = now_ms;
        profile.stats.total += 1;
        profile
            .behavior
            .record(now_ms, policy.adaptive.pattern_window_ms);

        // Hard penalty gate: deny without testing or consuming buckets.
        if profile.penalty.is_blocked(now_ms) {
            profile.stats.denied += 1;
            self.total_denied.fetch_add(1, Ordering::Relaxed);
            let retry = profile.penalty.retry_after_ms(now_ms);
            let factor = self.effective_factor(&profile, &policy);
            let limits = effective_limits(&policy, factor);
            let remaining = remaining_quota(&profile, &limits);
            return Decision::deny(
                DenyReason::Penalty,
                retry,
                now_ms,
                policy_id,
                limits,
                remaining,
                profile.adaptive.factor(),
                true,
            );
        }

        let factor = self.effective_factor(&profile, &policy);
        let limits = effective_limits(&policy, factor);

        profile.second.refill(now_ms, limits.second as f64, SECOND_MS);
        profile.minute.refill(now_ms, limits.minute as f64, MINUTE_MS);
        profile.hour.refill(now_ms, limits.hour as f64, HOUR_MS);
        profile.day.refill(now_ms, limits.day as f64, DAY_MS);

        let mut burst_applied = false;
        let failure = if !profile.second.has_tokens(weight) {
            if profile.burst.try_consume(now_ms, weight, &policy.burst) {
                burst_applied = true;
                None
            } else {
                Some((
                    DenyReason::RateLimitSecond,
                    profile.second.retry_after_token_ms(weight, SECOND_MS),
                ))
            }
        } else {
            None
        };
        let failure = failure.or_else(|| {
            if !profile.minute.has_tokens(weight) {
                Some((
                    DenyReason::RateLimitMinute,
                    profile.minute.retry_after_window_ms(now_ms, MINUTE_MS),
                ))
            } else if !profile.hour.has_tokens(weight) {
                Some((
                    DenyReason::RateLimitHour,
                    profile.hour.retry_after_window_ms(now_ms, HOUR_MS),
                ))
            } else if !profile.day.has_tokens(weight) {
                Some((
                    DenyReason::RateLimitDay,
                    profile.day.retry_after_window_ms(now_ms, DAY_MS),
                ))
            } else if u64::from(profile.active_concurrent) >= limits.concurrent {
                Some((DenyReason::ConcurrencyLimit, CONCURRENCY_RETRY_MS))
            } else {
                None
            }
        });

        match failure {
            Some((reason, retry_after_ms)) => {
                profile.stats.denied += 1;
                self.total_denied.fetch_add(1, Ordering::Relaxed);
                let escalated = profile.penalty.record_violation(now_ms, &policy.penalty);
                if escalated {
                    info!(
                        client_id,
                        level = profile.penalty.level(),
                        "client entered penalty"
                    );
                }
                let remaining = remaining_quota(&profile, &limits);
                Decision::deny(
                    reason,
                    retry_after_ms,
                    now_ms,
                    policy_id,
                    limits,
                    remaining,
                    profile.adaptive.factor(),
                    profile.penalty.is_penalized(),
                )
            }
            None => {
                profile.second.consume(weight);
                profile.minute.consume(weight);
                profile.hour.consume(weight);
                profile.day.consume(weight);
                profile.active_concurrent += 1;
                profile.stats.allowed += 1;
                self.total_allowed.fetch_add(1, Ordering::Relaxed);

                let penalty_applied = profile.penalty.is_penalized();
                // Recovery is earned by an admitted check: a client that
                // keeps violating after its suspension retains the
                // residual level and re-escalates from it.
                profile.penalty.try_recover(now_ms, &policy.penalty);

                let remaining = remaining_quota(&profile, &limits);
                Decision::allow(
                    policy_id,
                    limits,
                    remaining,
                    profile.adaptive.factor(),
                    burst_applied,
                    penalty_applied,
                )
            }
        }
    }

    /// Releases one concurrency slot for the client, floored at zero.
    ///
    /// Callers must pair every admitted check with exactly one release on
    /// all exit paths, including failures; an unreleased slot is held
    /// until the profile is evicted.
    pub fn release(&self, client_id: &str) {
        if let Some(entry) = self.profiles.get(client_id) {
            let mut profile = entry.lock().expect("profile lock poisoned");
            profile.active_concurrent = profile.active_concurrent.saturating_sub(1);
        }
    }

    /// Merges a partial system load sample, stamping the wall clock.
    pub fn update_system_load(&self, update: LoadUpdate) {
        self.load.update(update);
    }

    /// [`Self::update_system_load`] with an explicit timestamp.
    pub fn update_system_load_at(&self, update: LoadUpdate, now_ms: u64) {
        self.load.update_at(update, now_ms);
    }

    /// Applies a typed partial update to a registered policy.
    pub fn update_policy(&self, policy_id: &str, update: PolicyUpdate) -> Result<()> {
        self.policies.update(policy_id, update)
    }

    /// Returns a snapshot of the client's profile, if one exists.
    pub fn get_client_profile(&self, client_id: &str) -> Option<ProfileSnapshot> {
        self.profiles.get(client_id).map(|entry| {
            entry
                .lock()
                .expect("profile lock poisoned")
                .snapshot()
        })
    }

    /// Builds an engine-wide statistics snapshot, stamping the wall clock.
    pub fn get_stats(&self) -> EngineStats {
        self.get_stats_at(now_epoch_ms())
    }

    /// [`Self::get_stats`] with an explicit timestamp.
    pub fn get_stats_at(&self, now_ms: u64) -> EngineStats {
        let allowed = self.total_allowed.load(Ordering::Relaxed);
        let denied = self.total_denied.load(Ordering::Relaxed);
        let total = allowed + denied;
        let (allow_rate, deny_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            (allowed as f64 / total as f64, denied as f64 / total as f64)
        };

        let mut throttled = Vec::new();
        let mut penalized = 0;
        let mut bursting = 0;
        let mut anomalous = 0;

        for entry in self.profiles.iter() {
            let profile = entry.value().lock().expect("profile lock poisoned");
            if profile.stats.denied > 0 {
                throttled.push(ThrottledClient {
                    client_id: profile.client_id.clone(),
                    denied: profile.stats.denied,
                });
            }
            if profile.penalty.is_penalized() {
                penalized += 1;
            }
            if let Some(policy) = self.policies.get(&profile.policy_id) {
                if profile.burst.is_bursting(now_ms, &policy.burst) {
                    bursting += 1;
                }
            }
            if profile.behavior.pattern() == crate::behavior::TrafficPattern::Anomalous {
                anomalous += 1;
            }
        }
        throttled.sort_by(|a, b| b.denied.cmp(&a.denied).then(a.client_id.cmp(&b.client_id)));
        throttled.truncate(TOP_THROTTLED_LIMIT);

        EngineStats {
            total_clients: self.profiles.len(),
            active_policies: self.policies.len(),
            global_allow_rate: allow_rate,
            global_deny_rate: deny_rate,
            top_throttled: throttled,
            penalized_clients: penalized,
            bursting_clients: bursting,
            anomalous_clients: anomalous,
            system_load: self.load.current(),
        }
    }

    /// Runs one adaptive adjustment pass over all profiles.
    ///
    /// Profiles are collected first so that no map shard lock is held for
    /// the duration of the sweep; each profile mutex is taken only long
    /// enough to apply one adjustment.
    pub fn run_adaptive_cycle(&self, now_ms: u64) {
        let entries: Vec<Arc<Mutex<ClientProfile>>> = self
            .profiles
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut adjusted = 0usize;
        for entry in entries {
            let mut profile = entry.lock().expect("profile lock poisoned");
            let Some(policy) = self.policies.get(&profile.policy_id) else {
                continue;
            };
            if !policy.adaptive.enabled {
                continue;
            }

            let utilization = profile.stats.utilization_rate();
            let denial = profile.stats.denial_rate();
            let anomaly = profile.behavior.anomaly_score();
            if profile
                .adaptive
                .adjust(now_ms, utilization, denial, anomaly, &policy.adaptive)
                .is_some()
            {
                adjusted += 1;
            }
        }

        if adjusted > 0 {
            debug!(adjusted, "adaptive cycle applied adjustments");
        }
    }

    /// Evicts profiles not seen within the configured TTL.
    pub fn evict_idle_profiles(&self, now_ms: u64) {
        let before = self.profiles.len();
        let ttl = self.profile_ttl_ms;
        self.profiles.retain(|_, entry| {
            let profile = entry.lock().expect("profile lock poisoned");
            now_ms.saturating_sub(profile.last_seen_ms) <= ttl
        });
        let after = self.profiles.len();
        if before != after {
            info!(before, after, evicted = before - after, "idle profiles evicted");
        }
    }

    /// Effective quota factor for one check:
    /// `clamp(adaptive * load * penalty, [min_fraction, max_multiplier])`.
    fn effective_factor(&self, profile: &ClientProfile, policy: &RateLimitPolicy) -> f64 {
        let penalty_factor = if profile.penalty.is_penalized() {
            policy.penalty.penalty_multiplier
        } else {
            1.0
        };
        let raw = profile.adaptive.factor() * self.load.load_factor() * penalty_factor;
        raw.clamp(
            policy.adaptive.min_quota_fraction,
            policy.adaptive.max_quota_multiplier,
        )
    }
}

/// Scales each base quota by the clamped factor, rounding up.
fn effective_limits(policy: &RateLimitPolicy, factor: f64) -> EffectiveLimits {
    let q = &policy.quota;
    EffectiveLimits {
        second: (q.requests_per_second as f64 * factor).ceil() as u64,
        minute: (q.requests_per_minute as f64 * factor).ceil() as u64,
        hour: (q.requests_per_hour as f64 * factor).ceil() as u64,
        day: (q.requests_per_day as f64 * factor).ceil() as u64,
        concurrent: (q.max_concurrent as f64 * factor).ceil() as u64,
    }
}

/// Whole-token remaining quota per window.
fn remaining_quota(profile: &ClientProfile, limits: &EffectiveLimits) -> RemainingQuota {
    RemainingQuota {
        second: profile.second.tokens().floor() as u64,
        minute: profile.minute.tokens().floor() as u64,
        hour: profile.hour.tokens().floor() as u64,
        day: profile.day.tokens().floor() as u64,
        concurrent: limits
            .concurrent
            .saturating_sub(u64::from(profile.active_concurrent)),
    }
}

/// Spawns the background task that drives the adaptive cycle and the
/// idle-profile eviction sweep on a fixed cadence.
pub fn spawn_adaptive_cycle(
    controller: Arc<AdmissionController>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let now_ms = now_epoch_ms();
            controller.run_adaptive_cycle(now_ms);
            controller.evict_idle_profiles(now_ms);
        }
    })
}
