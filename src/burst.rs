//! Short-lived burst allowance above the sustained per-second rate.
//!
//! A burst window opens when the per-second bucket alone would deny a
//! request for a burst-enabled policy. Inside one window up to
//! `max_burst_tokens` extra tokens may be drawn; once the window closes
//! the client must wait out the configured cooldown before bursting
//! again. Burst never rescues minute/hour/day or concurrency denials.

use crate::config::BurstConfig;

/// Burst tracking for one client.
#[derive(Debug, Clone, Default)]
pub struct BurstState {
    /// Start of the open burst window, epoch ms; `None` when no window
    /// is open. Zero is a valid timestamp, so absence is explicit.
    window_start_ms: Option<u64>,
    /// Burst tokens drawn inside the open window.
    consumed: f64,
    /// Timestamp before which no new burst window may open, epoch ms.
    cooldown_until_ms: u64,
}

impl BurstState {
    /// Attempts to cover `weight` tokens from the burst allowance.
    ///
    /// Opens a new window if none is active and the cooldown has elapsed;
    /// expires a stale window (starting the cooldown) before deciding.
    /// Returns `true` and records the draw if the window budget covers
    /// the weight.
    pub fn try_consume(&mut self, now_ms: u64, weight: f64, config: &BurstConfig) -> bool {
        if !config.enabled {
            return false;
        }

        self.expire_window(now_ms, config);

        if now_ms < self.cooldown_until_ms {
            return false;
        }

        if self.window_start_ms.is_none() {
            self.window_start_ms = Some(now_ms);
            self.consumed = 0.0;
        }

        if self.consumed + weight > config.max_burst_tokens as f64 {
            return false;
        }
        self.consumed += weight;
        true
    }

    /// Returns `true` if a burst window is currently open.
    pub fn is_bursting(&self, now_ms: u64, config: &BurstConfig) -> bool {
        self.window_start_ms
            .is_some_and(|start| now_ms.saturating_sub(start) < config.window_ms)
    }

    /// Timestamp before which no new burst window may open, epoch ms.
    pub fn cooldown_until_ms(&self) -> u64 {
        self.cooldown_until_ms
    }

    /// Burst tokens drawn inside the open window.
    pub fn consumed(&self) -> f64 {
        self.consumed
    }

    /// Closes the window and starts the cooldown if the window has
    /// outlived its configured length.
    fn expire_window(&mut self, now_ms: u64, config: &BurstConfig) {
        if let Some(start) = self.window_start_ms {
            if now_ms.saturating_sub(start) >= config.window_ms {
                self.cooldown_until_ms = start + config.window_ms + config.cooldown_ms;
                self.window_start_ms = None;
                self.consumed = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_tokens: u32, window_ms: u64, cooldown_ms: u64) -> BurstConfig {
        BurstConfig {
            enabled: true,
            multiplier: 2.0,
            window_ms,
            cooldown_ms,
            max_burst_tokens: max_tokens,
        }
    }

    #[test]
    fn disabled_burst_never_consumes() {
        let cfg = BurstConfig::disabled();
        let mut state = BurstState::default();
        assert!(!state.try_consume(0, 1.0, &cfg));
    }

    #[test]
    fn burst_covers_up_to_budget_within_window() {
        let cfg = config(3, 5_000, 30_000);
        let mut state = BurstState::default();

        assert!(state.try_consume(0, 1.0, &cfg));
        assert!(state.try_consume(100, 1.0, &cfg));
        assert!(state.try_consume(200, 1.0, &cfg));
        assert!(!state.try_consume(300, 1.0, &cfg));
        assert!(state.is_bursting(300, &cfg));
    }

    #[test]
    fn expired_window_starts_cooldown() {
        let cfg = config(3, 5_000, 30_000);
        let mut state = BurstState::default();

        assert!(state.try_consume(0, 1.0, &cfg));
        // Window closes at 5s; cooldown runs until 35s.
        assert!(!state.try_consume(6_000, 1.0, &cfg));
        assert_eq!(state.cooldown_until_ms(), 35_000);
        assert!(!state.try_consume(20_000, 1.0, &cfg));

        // A fresh window opens once the cooldown elapses.
        assert!(state.try_consume(35_000, 1.0, &cfg));
        assert_eq!(state.consumed(), 1.0);
    }

    #[test]
    fn draws_at_timestamp_zero_share_one_window() {
        let cfg = config(2, 5_000, 30_000);
        let mut state = BurstState::default();

        // Epoch zero is a valid window start, not an empty marker.
        assert!(state.try_consume(0, 1.0, &cfg));
        assert!(state.try_consume(0, 1.0, &cfg));
        assert!(!state.try_consume(0, 1.0, &cfg));
        assert!(state.is_bursting(0, &cfg));

        // The window that opened at t=0 still earns its cooldown.
        assert!(!state.try_consume(5_000, 1.0, &cfg));
        assert_eq!(state.cooldown_until_ms(), 35_000);
    }

    #[test]
    fn weight_larger_than_budget_is_rejected() {
        let cfg = config(2, 5_000, 30_000);
        let mut state = BurstState::default();
        assert!(!state.try_consume(0, 3.0, &cfg));
        // The rejected draw still opened a window but consumed nothing.
        assert_eq!(state.consumed(), 0.0);
    }
}
