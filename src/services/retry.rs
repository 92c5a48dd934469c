//! Retry with exponential backoff for transient dependency failures.
//!
//! The deterministic schedule is non-decreasing and capped at `max_delay`;
//! jitter is added at sleep time only and the jittered delay stays within
//! the cap. Only transient error kinds are retried.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::domain::errors::DependencyError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter fraction in [0, 1]: up to `jitter * delay` is added.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Deterministic delay before retry number `attempt` (1-based: the
    /// delay slept after the first failure is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1.0).powi(exponent.min(63) as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Delay with jitter applied, still capped at `max_delay`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter;
        let extra = rand::thread_rng().gen_range(0.0..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + extra).min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` with retries. The closure receives the 1-based attempt
    /// number. Non-transient errors and exhausted attempts return the last
    /// error unchanged.
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, DependencyError>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, DependencyError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.jittered_delay(attempt);
                    debug!(
                        operation = op_name,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        // Unreachable unless attempts == 0 was clamped; keep the last error.
        Err(last_err.unwrap_or_else(|| DependencyError::Other("no attempts made".to_string())))
    }
}
