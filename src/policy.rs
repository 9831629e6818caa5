//! Policy registry: the read-mostly store of rate-limit policies.
//!
//! Policies are held as `Arc` snapshots behind a `RwLock`. Admission
//! checks take a cheap read lock and clone the `Arc`; updates build a
//! replacement policy and swap it in, so readers holding an old snapshot
//! are never torn mid-update.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::{default_policies, PolicyUpdate, RateLimitPolicy};
use crate::{now_epoch_ms, AdmissionError, Result};

/// Thread-safe registry of rate-limit policies keyed by policy id.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<String, Arc<RateLimitPolicy>>>,
}

impl PolicyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the four built-in tiers.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for policy in default_policies() {
            // Built-in tiers validate by construction.
            registry
                .insert(policy)
                .expect("default policies must be valid");
        }
        registry
    }

    /// Validates and registers a policy, replacing any existing policy
    /// with the same id.
    pub fn insert(&self, policy: RateLimitPolicy) -> Result<()> {
        policy.validate()?;
        let mut policies = self.policies.write().expect("policy lock poisoned");
        policies.insert(policy.id.clone(), Arc::new(policy));
        Ok(())
    }

    /// Returns the current snapshot of the policy with the given id.
    pub fn get(&self, policy_id: &str) -> Option<Arc<RateLimitPolicy>> {
        self.policies
            .read()
            .expect("policy lock poisoned")
            .get(policy_id)
            .cloned()
    }

    /// Applies a typed partial update to a registered policy, stamping
    /// `updated_at_ms` with the wall clock.
    ///
    /// Fails with [`AdmissionError::PolicyNotFound`] for unknown ids so
    /// that misconfiguration surfaces loudly instead of no-op'ing.
    pub fn update(&self, policy_id: &str, update: PolicyUpdate) -> Result<()> {
        self.update_at(policy_id, update, now_epoch_ms())
    }

    /// [`Self::update`] with an explicit timestamp.
    pub fn update_at(&self, policy_id: &str, update: PolicyUpdate, now_ms: u64) -> Result<()> {
        let mut policies = self.policies.write().expect("policy lock poisoned");
        let current = policies
            .get(policy_id)
            .ok_or_else(|| AdmissionError::PolicyNotFound(policy_id.into()))?;

        let mut updated = RateLimitPolicy::clone(current);
        if let Some(quota) = update.quota {
            updated.quota = quota;
        }
        if let Some(burst) = update.burst {
            updated.burst = burst;
        }
        if let Some(adaptive) = update.adaptive {
            updated.adaptive = adaptive;
        }
        if let Some(penalty) = update.penalty {
            updated.penalty = penalty;
        }
        if let Some(fairness) = update.fairness {
            updated.fairness = fairness;
        }
        updated.updated_at_ms = now_ms;
        updated.validate()?;

        info!(policy_id, "policy updated");
        policies.insert(policy_id.into(), Arc::new(updated));
        Ok(())
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.read().expect("policy lock poisoned").len()
    }

    /// Returns `true` if no policies are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered policy ids, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.policies
            .read()
            .expect("policy lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
