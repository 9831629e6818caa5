//! Admission decision values and their response-header projection.
//!
//! A decision is a plain value: either an admission with the remaining
//! quota per window, or a denial with a machine-readable reason and an
//! advisory retry-after. Rate-limit headers are assembled here so the
//! transport layer can attach them verbatim.

use std::fmt;

/// Fixed retry-after reported when the requested policy is not registered.
pub const POLICY_NOT_FOUND_RETRY_MS: u64 = 60_000;

/// Why a check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The per-second bucket lacked tokens.
    RateLimitSecond,
    /// The per-minute bucket lacked tokens.
    RateLimitMinute,
    /// The per-hour bucket lacked tokens.
    RateLimitHour,
    /// The per-day bucket lacked tokens.
    RateLimitDay,
    /// The concurrency limit was reached.
    ConcurrencyLimit,
    /// The client is serving a penalty suspension.
    Penalty,
    /// The requested policy id is not registered.
    PolicyNotFound,
}

impl DenyReason {
    /// Returns the stable wire tag for this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitSecond => "rate_limit_second",
            Self::RateLimitMinute => "rate_limit_minute",
            Self::RateLimitHour => "rate_limit_hour",
            Self::RateLimitDay => "rate_limit_day",
            Self::ConcurrencyLimit => "concurrency_limit",
            Self::Penalty => "penalty",
            Self::PolicyNotFound => "policy_not_found",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective per-window limits after adaptive and load scaling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectiveLimits {
    /// Effective per-second limit.
    pub second: u64,
    /// Effective per-minute limit.
    pub minute: u64,
    /// Effective per-hour limit.
    pub hour: u64,
    /// Effective per-day limit.
    pub day: u64,
    /// Effective concurrency limit.
    pub concurrent: u64,
}

/// Remaining quota per window at decision time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemainingQuota {
    /// Whole tokens left in the per-second bucket.
    pub second: u64,
    /// Whole tokens left in the per-minute bucket.
    pub minute: u64,
    /// Whole tokens left in the per-hour bucket.
    pub hour: u64,
    /// Whole tokens left in the per-day bucket.
    pub day: u64,
    /// Free concurrency slots.
    pub concurrent: u64,
}

/// The outcome of one admission check.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Denial reason; `None` when admitted.
    pub reason: Option<DenyReason>,
    /// Advisory wait before retrying, in milliseconds; `None` when admitted.
    pub retry_after_ms: Option<u64>,
    /// Effective limits applied to this check.
    pub limits: EffectiveLimits,
    /// Remaining quota after this check.
    pub remaining: RemainingQuota,
    /// Rate-limit headers ready for a transport layer.
    pub headers: Vec<(&'static str, String)>,
    /// The policy id applied (or requested, for unknown policies).
    pub policy_id: String,
    /// The client's adaptive factor at decision time.
    pub adaptive_factor: f64,
    /// Whether burst allowance rescued this request.
    pub burst_applied: bool,
    /// Whether a penalty quota multiplier was in effect.
    pub penalty_applied: bool,
}

impl Decision {
    /// Builds an admitted decision.
    pub fn allow(
        policy_id: &str,
        limits: EffectiveLimits,
        remaining: RemainingQuota,
        adaptive_factor: f64,
        burst_applied: bool,
        penalty_applied: bool,
    ) -> Self {
        let headers = base_headers(policy_id, &limits, &remaining);
        Self {
            allowed: true,
            reason: None,
            retry_after_ms: None,
            limits,
            remaining,
            headers,
            policy_id: policy_id.into(),
            adaptive_factor,
            burst_applied,
            penalty_applied,
        }
    }

    /// Builds a denied decision with retry headers derived from `now_ms`.
    #[allow(clippy::too_many_arguments)]
    pub fn deny(
        reason: DenyReason,
        retry_after_ms: u64,
        now_ms: u64,
        policy_id: &str,
        limits: EffectiveLimits,
        remaining: RemainingQuota,
        adaptive_factor: f64,
        penalty_applied: bool,
    ) -> Self {
        let mut headers = base_headers(policy_id, &limits, &remaining);
        headers.push(("Retry-After", retry_after_ms.div_ceil(1_000).to_string()));
        headers.push(("X-RateLimit-Reset", (now_ms + retry_after_ms).to_string()));
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after_ms: Some(retry_after_ms),
            limits,
            remaining,
            headers,
            policy_id: policy_id.into(),
            adaptive_factor,
            burst_applied: false,
            penalty_applied,
        }
    }

    /// Builds the denial returned for a policy id that is not registered.
    /// Independent of any client history.
    pub fn policy_not_found(policy_id: &str, now_ms: u64) -> Self {
        Self::deny(
            DenyReason::PolicyNotFound,
            POLICY_NOT_FOUND_RETRY_MS,
            now_ms,
            policy_id,
            EffectiveLimits::default(),
            RemainingQuota::default(),
            1.0,
            false,
        )
    }

    /// Looks up a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Headers present on every decision, allowed or denied.
fn base_headers(
    policy_id: &str,
    limits: &EffectiveLimits,
    remaining: &RemainingQuota,
) -> Vec<(&'static str, String)> {
    vec![
        ("X-RateLimit-Limit-Second", limits.second.to_string()),
        ("X-RateLimit-Remaining-Second", remaining.second.to_string()),
        ("X-RateLimit-Limit-Minute", limits.minute.to_string()),
        ("X-RateLimit-Remaining-Minute", remaining.minute.to_string()),
        ("X-RateLimit-Limit-Hour", limits.hour.to_string()),
        ("X-RateLimit-Remaining-Hour", remaining.hour.to_string()),
        ("X-RateLimit-Policy", policy_id.into()),
    ]
}
