//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

/// Controls how a shard reconnects after a recoverable connection drop.
///
/// The defaults (1 s base, 2× growth, 30 s cap, 5 attempts) are tuning
/// values, not protocol requirements — override them freely.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub growth_factor: f64,
    /// Maximum number of consecutive failures before escalating to a fatal
    /// error. `0` means unlimited retries.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            growth_factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Compute the delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = base_ms * self.growth_factor.powi(attempt as i32);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Whether the given attempt number exceeds the budget.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Cheap deterministic "random" fraction in `[0, 1)` derived from a seed.
/// Not cryptographically secure — just enough to spread heartbeat and
/// reconnect timing across shards.
pub(crate) fn pseudo_random_fraction(seed: u64) -> f64 {
    let folded = (seed as u32) ^ ((seed >> 32) as u32);
    let hash = folded.wrapping_mul(2654435761); // Knuth multiplicative hash
    f64::from(hash) / f64::from(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_values() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.base_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
        assert_eq!(p.max_attempts, 5);
    }

    #[test]
    fn delay_doubles_then_caps() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(p.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(p.delay_for_attempt(4), Duration::from_secs(16));
        // 2^5 = 32s would exceed the cap.
        assert_eq!(p.delay_for_attempt(5), Duration::from_secs(30));
        assert_eq!(p.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn gives_up_at_the_cap() {
        let p = ReconnectPolicy::default();
        assert!(!p.should_give_up(4));
        assert!(p.should_give_up(5));
        assert!(p.should_give_up(6));
    }

    #[test]
    fn zero_attempts_means_unlimited() {
        let p = ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(!p.should_give_up(1_000_000));
    }

    #[test]
    fn fraction_is_in_unit_interval() {
        for seed in [0u64, 1, 7, 42, u64::MAX, 0xDEAD_BEEF_CAFE] {
            let f = pseudo_random_fraction(seed);
            assert!((0.0..1.0).contains(&f), "seed {seed} gave {f}");
        }
    }
}
