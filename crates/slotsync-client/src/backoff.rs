//! Jittered exponential reconnect delay
//!
//! Each retry multiplies the previous delay by a random factor drawn from
//! `[min_factor, max_factor]`, so many clients dropped at once spread out
//! instead of reconnecting in lockstep.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Reconnect delay generator
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current_ms: u64,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff starting at `config.initial_ms`
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_ms: config.initial_ms,
            config,
            attempts: 0,
        }
    }

    /// Delay before the next retry, using the thread RNG for jitter
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// Delay before the next retry, drawing jitter from `rng`
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = self.current_ms;
        let factor = if self.config.max_factor > self.config.min_factor {
            rng.gen_range(self.config.min_factor..=self.config.max_factor)
        } else {
            self.config.min_factor
        };
        let grown = (self.current_ms as f64 * factor).round() as u64;
        self.current_ms = grown.clamp(self.config.initial_ms, self.config.max_ms);
        self.attempts += 1;
        Duration::from_millis(delay)
    }

    /// Go back to the initial delay
    pub fn reset(&mut self) {
        self.current_ms = self.config.initial_ms;
        self.attempts = 0;
    }

    /// Retries since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> BackoffConfig {
        BackoffConfig {
            initial_ms: 100,
            max_ms: 1_000,
            min_factor: 1.5,
            max_factor: 2.5,
        }
    }

    #[test]
    fn test_starts_at_initial() {
        let mut backoff = Backoff::new(config());
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn test_growth_stays_within_factor_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut backoff = Backoff::new(config());

        let mut previous = backoff.next_delay_with(&mut rng).as_millis() as f64;
        for _ in 0..3 {
            let next = backoff.next_delay_with(&mut rng).as_millis() as f64;
            if next < 1_000.0 {
                assert!(next >= (previous * 1.5).floor(), "{next} after {previous}");
                assert!(next <= (previous * 2.5).ceil(), "{next} after {previous}");
            }
            previous = next;
        }
    }

    #[test]
    fn test_capped_at_max() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut backoff = Backoff::new(config());
        for _ in 0..20 {
            assert!(backoff.next_delay_with(&mut rng) <= Duration::from_millis(1_000));
        }
        assert_eq!(
            backoff.next_delay_with(&mut rng),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_fixed_factor_is_deterministic() {
        let mut backoff = Backoff::new(BackoffConfig {
            min_factor: 2.0,
            max_factor: 2.0,
            ..config()
        });
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000]);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(config());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
