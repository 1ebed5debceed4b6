//! Exponential backoff calculation for reconnection attempts

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Cap on the un-jittered delay in milliseconds
    pub max_delay_ms: u64,
    /// Jitter fraction (0.0 to 1.0), applied as ±
    pub jitter_ratio: f64,
    /// Attempts before giving up, 0 = unlimited
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000, // 30 seconds
            jitter_ratio: 0.2,
            max_attempts: 0,
        }
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter_ratio: config.jitter_ratio,
            max_attempts: config.max_attempts,
        }
    }
}

/// Snapshot of backoff progress, recomputed from the attempt count
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffState {
    pub attempt: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

/// Computes retry delays: `min(max, base * 2^attempt) * (1 ± jitter)`
#[derive(Debug, Clone)]
pub struct ReconnectionScheduler {
    policy: BackoffPolicy,
}

impl ReconnectionScheduler {
    pub fn new(mut policy: BackoffPolicy) -> Self {
        policy.jitter_ratio = policy.jitter_ratio.clamp(0.0, 1.0);
        Self { policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Un-jittered delay for `attempt` (0-based), capped at `max_delay_ms`
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.policy
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_delay_ms)
    }

    /// Inclusive lower and exclusive upper bound of `next_delay(attempt)`
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let (low, high) = self.bounds_ms(attempt);
        (
            Duration::from_secs_f64(low / 1000.0),
            Duration::from_secs_f64(high / 1000.0),
        )
    }

    /// Jittered delay for `attempt` using the thread-local RNG
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::rng())
    }

    /// Jittered delay for `attempt` drawn from `rng`
    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let (low, high) = self.bounds_ms(attempt);
        let delay_ms = if high > low {
            rng.random_range(low..high)
        } else {
            low
        };
        Duration::from_secs_f64(delay_ms.max(0.0) / 1000.0)
    }

    /// True once `attempt` (1-based count of scheduled retries) exceeds the policy
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.policy.max_attempts != 0 && attempt > self.policy.max_attempts
    }

    pub fn state(&self, attempt: u32) -> BackoffState {
        BackoffState {
            attempt,
            base_delay_ms: self.policy.base_delay_ms,
            max_delay_ms: self.policy.max_delay_ms,
            jitter_ratio: self.policy.jitter_ratio,
        }
    }

    fn bounds_ms(&self, attempt: u32) -> (f64, f64) {
        let capped = self.base_delay_ms(attempt) as f64;
        let jitter = capped * self.policy.jitter_ratio;
        (capped - jitter, capped + jitter)
    }
}

impl Default for ReconnectionScheduler {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
