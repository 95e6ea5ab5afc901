//! Bounded exponential backoff with jitter for shard reconnection

use std::time::Duration;

use rand::Rng;

use crate::config::MergerConfig;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl From<&MergerConfig> for BackoffConfig {
    fn from(config: &MergerConfig) -> Self {
        Self {
            initial_delay_ms: config.backoff_initial_delay_ms.max(1),
            max_delay_ms: config
                .backoff_max_delay_ms
                .max(config.backoff_initial_delay_ms.max(1)),
            ..Default::default()
        }
    }
}

pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for the next attempt: `initial * multiplier^attempt`, capped,
    /// then spread by the jitter factor.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(32) as i32;
        self.attempt = self.attempt.saturating_add(1);

        let base = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = base.min(self.config.max_delay_ms as f64);

        let jitter_range = capped * self.config.jitter_factor.clamp(0.0, 1.0);
        let delay = if jitter_range > 0.0 {
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped + jitter).clamp(1.0, self.config.max_delay_ms.max(1) as f64)
        } else {
            capped.max(1.0)
        };

        Duration::from_millis(delay as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial: u64, max: u64) -> ExponentialBackoff {
        ExponentialBackoff::with_config(BackoffConfig {
            initial_delay_ms: initial,
            max_delay_ms: max,
            multiplier: 2.0,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_delays_double() {
        let mut backoff = no_jitter(100, 10_000);

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let mut backoff = no_jitter(1000, 5000);
        for _ in 0..10 {
            assert!(backoff.next_delay() <= Duration::from_millis(5000));
        }
        assert_eq!(backoff.next_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn test_reset() {
        let mut backoff = no_jitter(100, 10_000);
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter_factor: 0.5,
        });

        for _ in 0..50 {
            let delay = backoff.next_delay().as_millis();
            assert!((500..=1000).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_from_merger_config() {
        let merger = MergerConfig {
            backoff_initial_delay_ms: 0,
            backoff_max_delay_ms: 0,
            ..Default::default()
        };
        let config = BackoffConfig::from(&merger);
        assert_eq!(config.initial_delay_ms, 1);
        assert_eq!(config.max_delay_ms, 1);
    }
}
