//! Exponential backoff with jitter for channel retries

use rand::Rng;
use std::time::Duration;

/// Backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub base: Duration,
    /// Upper bound on any single delay
    pub max: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Fraction of the delay randomized (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffConfig {
    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms.max(base_ms)),
            ..Self::default()
        }
    }
}

/// Per-job backoff state
#[derive(Debug, Clone)]
pub struct BackoffState {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next retry; grows with every call
    pub fn next_backoff(&mut self) -> Duration {
        let exp = self.config.multiplier.powi(self.attempt.min(32) as i32);
        let raw = self.config.base.as_secs_f64() * exp;
        let capped = raw.min(self.config.max.as_secs_f64());

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - jitter)..=1.0)
        } else {
            1.0
        };

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_secs_f64(capped * factor)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
