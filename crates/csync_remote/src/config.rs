//! Configuration for the sync adapter.

use std::time::Duration;

/// Zone used when none is configured.
pub const DEFAULT_ZONE: &str = "ChangeSets";

/// Configuration for push and fetch.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote zone holding the changeset records.
    pub zone: String,
    /// Retry configuration for retryable remote errors.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for the given zone.
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ZONE)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration allowing `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Retries immediately, without waiting. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::no_retry()
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% on top.
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random fraction in `[0, 1)` from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("Players").with_retry(RetryConfig::no_retry());
        assert_eq!(config.zone, "Players");
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(SyncConfig::default().zone, DEFAULT_ZONE);
    }

    #[test]
    fn immediate_retry_has_no_delay() {
        let config = RetryConfig::immediate(4);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(150));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn jitter_adds_at_most_a_quarter() {
        let jittered = RetryConfig::new(5).with_initial_delay(Duration::from_millis(400));
        let plain = jittered.clone().with_jitter(false);
        for attempt in 1..5 {
            let base = plain.delay_for_attempt(attempt);
            let delay = jittered.delay_for_attempt(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base / 4);
        }
        let fraction = rand_jitter();
        assert!((0.0..1.0).contains(&fraction));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
