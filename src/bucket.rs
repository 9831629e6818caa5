//! Time-window token buckets.
//!
//! Each bucket refills continuously in proportion to elapsed time, but
//! additionally tracks a fixed window (start timestamp plus request count)
//! that resets at window boundaries. The fixed window exists solely to
//! report retry-after times for the coarse (minute/hour/day) buckets;
//! the per-second bucket derives its retry time from token math instead.
//! Both mechanisms are part of the admission contract and must not be
//! unified.

/// A single refillable token bucket over one time window.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current token balance. Always within `[0, capacity]`.
    tokens: f64,
    /// Capacity as of the last refill; tracks the effective quota.
    capacity: f64,
    /// Timestamp of the last continuous refill, epoch milliseconds.
    last_refill_ms: u64,
    /// Start of the current fixed window, epoch milliseconds.
    window_start_ms: u64,
    /// Requests admitted in the current fixed window.
    window_requests: u64,
}

impl TokenBucket {
    /// Creates a full bucket with the given capacity.
    pub fn new(capacity: f64, now_ms: u64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            last_refill_ms: now_ms,
            window_start_ms: now_ms,
            window_requests: 0,
        }
    }

    /// Refills the bucket for the time elapsed since the last refill and
    /// rolls the fixed window forward if it has expired.
    ///
    /// `capacity` is the current effective limit for this window; it may
    /// differ from the capacity seen on the previous refill when the
    /// adaptive factor or system load has moved. The balance is clamped
    /// into `[0, capacity]` after every update.
    pub fn refill(&mut self, now_ms: u64, capacity: f64, window_ms: u64) {
        self.capacity = capacity;

        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed_ms > 0 {
            let rate = capacity / (window_ms as f64 / 1000.0);
            self.tokens += elapsed_ms as f64 / 1000.0 * rate;
            self.last_refill_ms = now_ms;
        }
        self.tokens = self.tokens.clamp(0.0, capacity);

        if now_ms.saturating_sub(self.window_start_ms) >= window_ms {
            self.window_start_ms = now_ms;
            self.window_requests = 0;
        }

        debug_assert!(self.tokens >= 0.0 && self.tokens <= self.capacity);
    }

    /// Returns `true` if at least `weight` tokens are available.
    pub fn has_tokens(&self, weight: f64) -> bool {
        // Small epsilon absorbs float error from fractional refills.
        self.tokens + 1e-9 >= weight
    }

    /// Consumes `weight` tokens and counts the request against the fixed
    /// window. The balance never goes below zero.
    pub fn consume(&mut self, weight: f64) {
        self.tokens = (self.tokens - weight).max(0.0);
        self.window_requests += 1;
    }

    /// Retry-after for the per-second bucket, derived from token math:
    /// the time until the deficit refills at the sustained rate.
    ///
    /// A weight above the capacity can never be served no matter how
    /// long the caller waits; the advice is capped at one full window
    /// rather than promising a wait that cannot succeed.
    pub fn retry_after_token_ms(&self, weight: f64, window_ms: u64) -> u64 {
        let rate = self.capacity / (window_ms as f64 / 1000.0);
        if rate <= 0.0 || weight > self.capacity {
            return window_ms;
        }
        let deficit = (weight - self.tokens).max(0.0);
        (deficit / rate * 1000.0).ceil() as u64
    }

    /// Retry-after for coarse buckets, derived from the fixed window:
    /// the time until the current window rolls over.
    pub fn retry_after_window_ms(&self, now_ms: u64, window_ms: u64) -> u64 {
        window_ms.saturating_sub(now_ms.saturating_sub(self.window_start_ms))
    }

    /// Current token balance.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Capacity as of the last refill.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Requests admitted in the current fixed window.
    pub fn window_requests(&self) -> u64 {
        self.window_requests
    }
}
