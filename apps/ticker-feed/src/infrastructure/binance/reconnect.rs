//! Reconnection Policy
//!
//! Fixed-interval reconnection with jitter. The upstream is expected to be
//! available, so there is no attempt limit and no exponential growth; the
//! floor keeps a persistently failing host from being hammered.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay between a transport failure and the next connect attempt.
    pub delay: Duration,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Lower bound applied after jitter.
    pub min_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            jitter_factor: 0.1,
            min_delay: Duration::from_millis(250),
        }
    }
}

impl ReconnectConfig {
    /// Fixed delay without jitter, floored at `min(delay, default floor)`.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            jitter_factor: 0.0,
            min_delay: delay.min(Self::default().min_delay),
        }
    }
}

/// Reconnection policy: same delay every attempt, attempts counted until reset.
///
/// # Example
///
/// ```rust
/// use ticker_feed::infrastructure::binance::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_secs(3)));
/// assert_eq!(policy.next_delay(), Duration::from_secs(3));
/// assert_eq!(policy.attempt_count(), 1);
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt; never gives up.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.apply_jitter(self.config.delay).max(self.config.min_delay)
    }

    /// Reset the attempt counter after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts since the last successful connection.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Scale `delay` by a random factor in `1 ± jitter_factor`.
    fn apply_jitter(&self, delay: Duration) -> Duration {
        let spread = self.config.jitter_factor.clamp(0.0, 1.0);
        if spread <= 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay, Duration::from_secs(3));
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.min_delay, Duration::from_millis(250));
    }

    #[test]
    fn delay_stays_fixed_across_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_millis(800)));
        for attempt in 1..=50 {
            assert_eq!(policy.next_delay(), Duration::from_millis(800));
            assert_eq!(policy.attempt_count(), attempt);
        }
    }

    #[test]
    fn floor_prevents_hot_loop() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            delay: Duration::ZERO,
            jitter_factor: 0.0,
            min_delay: Duration::from_millis(250),
        });
        assert_eq!(policy.next_delay(), Duration::from_millis(250));
    }

    #[test]
    fn reset_clears_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
    }

    #[test]
    fn jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                delay: Duration::from_millis(3000),
                jitter_factor: 0.1,
                min_delay: Duration::from_millis(250),
            });

            let millis = policy.next_delay().as_millis();
            assert!(millis >= 2699, "delay {millis}ms is below minimum 2700ms");
            assert!(millis <= 3300, "delay {millis}ms is above maximum 3300ms");
        }
    }
}
