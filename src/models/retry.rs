use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: 1_000,
            max_delay_ms: 300_000,
            backoff_multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// Un-jittered delay after the `retry_count`-th failure (1-based).
    pub fn base_delay_ms(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.saturating_sub(1);
        let factor = self.backoff_multiplier.max(1).saturating_pow(exponent);

        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Delay before the next attempt, with +/-10% jitter.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.base_delay_ms(retry_count);
        if base == 0 {
            return Duration::ZERO;
        }

        let jitter = rand::random_range(-0.1..=0.1);
        let jittered = (base as f64 * (1.0 + jitter)) as u64;

        Duration::from_millis(jittered)
    }
}
