//! Policy configuration: tiers, quotas, and the knobs that drive the
//! adaptive, penalty, burst, and fairness machinery.
//!
//! Policies are deserialized from YAML exactly once at startup and
//! validated before they reach the [`crate::PolicyRegistry`]. All numeric
//! bounds are checked up front so the admission hot path never has to
//! defend against zero or negative configuration values.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{now_epoch_ms, AdmissionError, Result};

/// Default weight of a single request in tokens.
pub const DEFAULT_TOKENS_PER_REQUEST: u32 = 1;

/// Default maximum request payload size: 1 MiB.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 1024 * 1024;

/// Default burst window length in milliseconds.
pub const DEFAULT_BURST_WINDOW_MS: u64 = 5_000;

/// Default cooldown after a burst window closes, in milliseconds.
pub const DEFAULT_BURST_COOLDOWN_MS: u64 = 30_000;

/// Default learning rate for adaptive quota adjustment.
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

/// Default interval between adaptive adjustments per client, in milliseconds.
pub const DEFAULT_ADJUSTMENT_INTERVAL_MS: u64 = 60_000;

/// Default lower bound on the adaptive quota factor.
pub const DEFAULT_MIN_QUOTA_FRACTION: f64 = 0.1;

/// Default upper bound on the adaptive quota factor.
pub const DEFAULT_MAX_QUOTA_MULTIPLIER: f64 = 2.0;

/// Default anomaly score above which quotas are tightened.
pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 3.0;

/// Default rolling window for behavioral pattern analysis, in milliseconds.
pub const DEFAULT_PATTERN_WINDOW_MS: u64 = 10_000;

/// Default number of rolling violations before a penalty is applied.
pub const DEFAULT_VIOLATION_THRESHOLD: u32 = 10;

/// Default quota multiplier applied while a client carries penalty level.
pub const DEFAULT_PENALTY_MULTIPLIER: f64 = 0.5;

/// Default base penalty duration in milliseconds; doubles per level.
pub const DEFAULT_PENALTY_DURATION_MS: u64 = 60_000;

/// Default maximum penalty escalation level.
pub const DEFAULT_ESCALATION_STEPS: u32 = 5;

/// Default minimum quota fraction guaranteed to a tier under contention.
pub const DEFAULT_MIN_GUARANTEED_FRACTION: f64 = 0.1;

/// Service tier a policy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
    Internal,
    Custom,
}

impl Tier {
    /// Returns the canonical lowercase name of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
            Self::Internal => "internal",
            Self::Custom => "custom",
        }
    }
}

/// Base per-window quotas for a policy, before adaptive scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Maximum requests per second.
    pub requests_per_second: u32,
    /// Maximum requests per minute.
    pub requests_per_minute: u32,
    /// Maximum requests per hour.
    pub requests_per_hour: u32,
    /// Maximum requests per day.
    pub requests_per_day: u32,
    /// Token weight of a request when the caller does not override it.
    #[serde(default = "default_tokens_per_request")]
    pub tokens_per_request: u32,
    /// Maximum concurrent in-flight requests per client.
    pub max_concurrent: u32,
    /// Maximum request payload size in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
}

fn default_tokens_per_request() -> u32 {
    DEFAULT_TOKENS_PER_REQUEST
}

fn default_max_payload_bytes() -> u64 {
    DEFAULT_MAX_PAYLOAD_BYTES
}

/// Temporary above-quota allowance for short traffic spikes.
///
/// A burst window opens when the per-second bucket alone would deny a
/// request; up to `max_burst_tokens` may be drawn inside one window,
/// after which the client must wait out `cooldown_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Whether burst allowance is available at all for this policy.
    pub enabled: bool,
    /// Multiplier over the sustained per-second rate a burst may reach.
    #[serde(default = "default_burst_multiplier")]
    pub multiplier: f64,
    /// Length of a burst window in milliseconds.
    #[serde(default = "default_burst_window_ms")]
    pub window_ms: u64,
    /// Cooldown after a burst window closes, in milliseconds.
    #[serde(default = "default_burst_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Total extra tokens available within one burst window.
    pub max_burst_tokens: u32,
}

fn default_burst_multiplier() -> f64 {
    2.0
}

fn default_burst_window_ms() -> u64 {
    DEFAULT_BURST_WINDOW_MS
}

fn default_burst_cooldown_ms() -> u64 {
    DEFAULT_BURST_COOLDOWN_MS
}

impl BurstConfig {
    /// A disabled burst configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            multiplier: default_burst_multiplier(),
            window_ms: default_burst_window_ms(),
            cooldown_ms: default_burst_cooldown_ms(),
            max_burst_tokens: 0,
        }
    }

    /// An enabled burst configuration sized from the sustained rate:
    /// `max_burst_tokens = requests_per_second * multiplier`.
    pub fn scaled(requests_per_second: u32, multiplier: f64) -> Self {
        Self {
            enabled: true,
            multiplier,
            window_ms: default_burst_window_ms(),
            cooldown_ms: default_burst_cooldown_ms(),
            max_burst_tokens: (requests_per_second as f64 * multiplier) as u32,
        }
    }
}

/// Closed-loop quota adjustment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Whether the adaptive cycle adjusts this policy's clients.
    pub enabled: bool,
    /// Step size for factor adjustments.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Minimum time between adjustments for one client, in milliseconds.
    #[serde(default = "default_adjustment_interval_ms")]
    pub adjustment_interval_ms: u64,
    /// Lower clamp on the adjustment factor.
    #[serde(default = "default_min_quota_fraction")]
    pub min_quota_fraction: f64,
    /// Upper clamp on the adjustment factor.
    #[serde(default = "default_max_quota_multiplier")]
    pub max_quota_multiplier: f64,
    /// Anomaly score above which the factor is reduced.
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
    /// Rolling window for behavioral analysis, in milliseconds.
    #[serde(default = "default_pattern_window_ms")]
    pub pattern_window_ms: u64,
}

fn default_learning_rate() -> f64 {
    DEFAULT_LEARNING_RATE
}

fn default_adjustment_interval_ms() -> u64 {
    DEFAULT_ADJUSTMENT_INTERVAL_MS
}

fn default_min_quota_fraction() -> f64 {
    DEFAULT_MIN_QUOTA_FRACTION
}

fn default_max_quota_multiplier() -> f64 {
    DEFAULT_MAX_QUOTA_MULTIPLIER
}

fn default_anomaly_threshold() -> f64 {
    DEFAULT_ANOMALY_THRESHOLD
}

fn default_pattern_window_ms() -> u64 {
    DEFAULT_PATTERN_WINDOW_MS
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            learning_rate: default_learning_rate(),
            adjustment_interval_ms: default_adjustment_interval_ms(),
            min_quota_fraction: default_min_quota_fraction(),
            max_quota_multiplier: default_max_quota_multiplier(),
            anomaly_threshold: default_anomaly_threshold(),
            pattern_window_ms: default_pattern_window_ms(),
        }
    }
}

/// Escalating penalty configuration for repeat quota violators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Whether penalties are applied at all for this policy.
    pub enabled: bool,
    /// Rolling violations that trigger an escalation.
    #[serde(default = "default_violation_threshold")]
    pub violation_threshold: u32,
    /// Quota multiplier applied while a client carries penalty level.
    #[serde(default = "default_penalty_multiplier")]
    pub penalty_multiplier: f64,
    /// Base penalty duration in milliseconds; doubles per level.
    #[serde(default = "default_penalty_duration_ms")]
    pub penalty_duration_ms: u64,
    /// Maximum escalation level.
    #[serde(default = "default_escalation_steps")]
    pub escalation_steps: u32,
    /// Whether the level decays by one after each served penalty.
    #[serde(default = "default_auto_recovery")]
    pub auto_recovery: bool,
}

fn default_violation_threshold() -> u32 {
    DEFAULT_VIOLATION_THRESHOLD
}

fn default_penalty_multiplier() -> f64 {
    DEFAULT_PENALTY_MULTIPLIER
}

fn default_penalty_duration_ms() -> u64 {
    DEFAULT_PENALTY_DURATION_MS
}

fn default_escalation_steps() -> u32 {
    DEFAULT_ESCALATION_STEPS
}

fn default_auto_recovery() -> bool {
    true
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            violation_threshold: default_violation_threshold(),
            penalty_multiplier: default_penalty_multiplier(),
            penalty_duration_ms: default_penalty_duration_ms(),
            escalation_steps: default_escalation_steps(),
            auto_recovery: default_auto_recovery(),
        }
    }
}

/// Relative prioritization of tiers when capacity is contended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessConfig {
    /// Fairness algorithm tag (e.g. `"weighted_fair"`).
    #[serde(default = "default_fairness_algorithm")]
    pub algorithm: String,
    /// Relative weight per tier name.
    #[serde(default = "default_tier_weights")]
    pub tier_weights: HashMap<String, u32>,
    /// Fraction of base quota a tier is always guaranteed.
    #[serde(default = "default_min_guaranteed_fraction")]
    pub min_guaranteed_fraction: f64,
}

fn default_fairness_algorithm() -> String {
    "weighted_fair".into()
}

fn default_tier_weights() -> HashMap<String, u32> {
    HashMap::from([
        ("free".into(), 1),
        ("pro".into(), 2),
        ("enterprise".into(), 4),
        ("internal".into(), 8),
    ])
}

fn default_min_guaranteed_fraction() -> f64 {
    DEFAULT_MIN_GUARANTEED_FRACTION
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            algorithm: default_fairness_algorithm(),
            tier_weights: default_tier_weights(),
            min_guaranteed_fraction: default_min_guaranteed_fraction(),
        }
    }
}

/// A complete rate-limit policy for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Unique policy identifier.
    pub id: String,
    /// Service tier this policy applies to.
    pub tier: Tier,
    /// Base per-window quotas.
    pub quota: QuotaConfig,
    /// Burst allowance configuration.
    pub burst: BurstConfig,
    /// Adaptive quota adjustment configuration.
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    /// Penalty escalation configuration.
    #[serde(default)]
    pub penalty: PenaltyConfig,
    /// Fairness weighting configuration.
    #[serde(default)]
    pub fairness: FairnessConfig,
    /// Creation timestamp in epoch milliseconds.
    #[serde(default)]
    pub created_at_ms: u64,
    /// Last-update timestamp in epoch milliseconds.
    #[serde(default)]
    pub updated_at_ms: u64,
}

impl RateLimitPolicy {
    /// Builds a policy with the given quotas and burst settings, all other
    /// sections at their defaults.
    pub fn new(id: &str, tier: Tier, quota: QuotaConfig, burst: BurstConfig) -> Self {
        let now = now_epoch_ms();
        Self {
            id: id.into(),
            tier,
            quota,
            burst,
            adaptive: AdaptiveConfig::default(),
            penalty: PenaltyConfig::default(),
            fairness: FairnessConfig::default(),
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// Validates all numeric bounds.
    ///
    /// Quotas and concurrency must be positive, the adaptive clamp range
    /// must be well-ordered, and burst sizing must be positive when burst
    /// is enabled.
    pub fn validate(&self) -> Result<()> {
        let q = &self.quota;
        if q.requests_per_second == 0
            || q.requests_per_minute == 0
            || q.requests_per_hour == 0
            || q.requests_per_day == 0
        {
            return Err(AdmissionError::Config(format!(
                "policy {}: all per-window quotas must be positive",
                self.id
            )));
        }
        if q.tokens_per_request == 0 || q.max_concurrent == 0 {
            return Err(AdmissionError::Config(format!(
                "policy {}: tokens_per_request and max_concurrent must be positive",
                self.id
            )));
        }
        if self.adaptive.min_quota_fraction <= 0.0
            || self.adaptive.min_quota_fraction > self.adaptive.max_quota_multiplier
        {
            return Err(AdmissionError::Config(format!(
                "policy {}: min_quota_fraction must be positive and not exceed max_quota_multiplier",
                self.id
            )));
        }
        if self.adaptive.learning_rate <= 0.0 || self.adaptive.adjustment_interval_ms == 0 {
            return Err(AdmissionError::Config(format!(
                "policy {}: learning_rate and adjustment_interval_ms must be positive",
                self.id
            )));
        }
        if self.penalty.enabled
            && (self.penalty.violation_threshold == 0
                || self.penalty.penalty_multiplier <= 0.0
                || self.penalty.penalty_duration_ms == 0
                || self.penalty.escalation_steps == 0)
        {
            return Err(AdmissionError::Config(format!(
                "policy {}: penalty bounds must be positive when penalties are enabled",
                self.id
            )));
        }
        if self.burst.enabled && (self.burst.max_burst_tokens == 0 || self.burst.multiplier < 1.0) {
            return Err(AdmissionError::Config(format!(
                "policy {}: burst sizing must be positive when burst is enabled",
                self.id
            )));
        }
        Ok(())
    }
}

/// Typed partial update for a registered policy.
///
/// Each field replaces the corresponding section wholesale when present;
/// absent sections are left untouched. This enumerates exactly which parts
/// of a policy may change at runtime, so an update can never silently
/// reset fields the caller did not name.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PolicyUpdate {
    /// Replacement base quotas.
    pub quota: Option<QuotaConfig>,
    /// Replacement burst configuration.
    pub burst: Option<BurstConfig>,
    /// Replacement adaptive configuration.
    pub adaptive: Option<AdaptiveConfig>,
    /// Replacement penalty configuration.
    pub penalty: Option<PenaltyConfig>,
    /// Replacement fairness configuration.
    pub fairness: Option<FairnessConfig>,
}

/// The four built-in policy tiers.
///
/// Quotas are requests per second/minute/hour/day. Burst is disabled for
/// `free`; `enterprise` bursts at 3x its sustained rate, the other paid
/// tiers at 2x.
pub fn default_policies() -> Vec<RateLimitPolicy> {
    vec![
        RateLimitPolicy::new(
            "free",
            Tier::Free,
            QuotaConfig {
                requests_per_second: 10,
                requests_per_minute: 100,
                requests_per_hour: 1_000,
                requests_per_day: 5_000,
                tokens_per_request: DEFAULT_TOKENS_PER_REQUEST,
                max_concurrent: 5,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            },
            BurstConfig::disabled(),
        ),
        RateLimitPolicy::new(
            "pro",
            Tier::Pro,
            QuotaConfig {
                requests_per_second: 100,
                requests_per_minute: 1_000,
                requests_per_hour: 20_000,
                requests_per_day: 100_000,
                tokens_per_request: DEFAULT_TOKENS_PER_REQUEST,
                max_concurrent: 50,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            },
            BurstConfig::scaled(100, 2.0),
        ),
        RateLimitPolicy::new(
            "enterprise",
            Tier::Enterprise,
            QuotaConfig {
                requests_per_second: 1_000,
                requests_per_minute: 50_000,
                requests_per_hour: 500_000,
                requests_per_day: 5_000_000,
                tokens_per_request: DEFAULT_TOKENS_PER_REQUEST,
                max_concurrent: 500,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            },
            BurstConfig::scaled(1_000, 3.0),
        ),
        RateLimitPolicy::new(
            "internal",
            Tier::Internal,
            QuotaConfig {
                requests_per_second: 10_000,
                requests_per_minute: 500_000,
                requests_per_hour: 5_000_000,
                requests_per_day: 50_000_000,
                tokens_per_request: DEFAULT_TOKENS_PER_REQUEST,
                max_concurrent: 5_000,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            },
            BurstConfig::scaled(10_000, 2.0),
        ),
    ]
}

/// On-disk policy set as deserialized from a YAML file.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyFile {
    /// The policies to register, each validated on load.
    #[serde(default)]
    pub policies: Vec<RateLimitPolicy>,
}

impl PolicyFile {
    /// Loads and validates a policy set from a YAML file at the given path.
    pub fn load_from_file(file_path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let file = std::fs::File::open(file_path).map_err(|e| {
            AdmissionError::Config(format!(
                "failed to open {}: {e}",
                file_path.as_ref().display()
            ))
        })?;

        let parsed: Self = serde_yaml::from_reader(file)
            .map_err(|e| AdmissionError::Config(format!("failed to parse policy file: {e}")))?;

        for policy in &parsed.policies {
            policy.validate()?;
        }
        Ok(parsed)
    }
}
