//! Resilience facade: circuit breaker + retry around a named dependency.
//!
//! Call flow: breaker check → attempt → record outcome → back off and
//! repeat while transient. A circuit-open rejection is not an operation
//! failure and is never retried; callers receive `SwarmError::CircuitOpen`
//! with the earliest retry time.

use std::sync::Arc;

use tracing::debug;

use crate::domain::errors::{DependencyError, SwarmError, SwarmResult};
use crate::services::circuit_breaker::{CircuitBreakerRegistry, CircuitCheck};
use crate::services::retry::RetryPolicy;

pub struct Resilience {
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
}

impl Resilience {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, retry: RetryPolicy) -> Self {
        Self { breakers, retry }
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `op` against `dependency` under breaker and retry protection.
    ///
    /// The breaker is consulted before every attempt, so a circuit that
    /// opens mid-retry stops the loop immediately.
    pub async fn call<T, F, Fut>(&self, dependency: &str, mut op: F) -> SwarmResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, DependencyError>>,
    {
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            if let CircuitCheck::Open { retry_after } = self.breakers.check(dependency).await {
                return Err(SwarmError::CircuitOpen {
                    dependency: dependency.to_string(),
                    retry_after,
                });
            }

            match op(attempt).await {
                Ok(value) => {
                    self.breakers.record_success(dependency).await;
                    return Ok(value);
                }
                Err(err) => {
                    self.breakers.record_failure(dependency, err.to_string()).await;

                    if err.is_transient() && attempt < attempts {
                        let delay = self.retry.jittered_delay(attempt);
                        debug!(
                            dependency,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "dependency call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(SwarmError::DependencyFailed {
                        dependency: dependency.to_string(),
                        source: err,
                    });
                }
            }
        }

        unreachable!("retry loop returns on the final attempt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::circuit_breaker::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn resilience(failure_threshold: u32, max_attempts: u32) -> Resilience {
        Resilience::new(
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
                failure_threshold,
                success_threshold: 1,
                cooldown: chrono::Duration::hours(1),
            })),
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                jitter: 0.0,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn success_passes_through() {
        let r = resilience(5, 3);
        let value = r.call("llm", |_| async { Ok::<_, DependencyError>(7) }).await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_then_reported() {
        let r = resilience(10, 3);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        let result: SwarmResult<()> = r
            .call("scraper", move |_| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DependencyError::Timeout)
                }
            })
            .await;

        assert!(matches!(result, Err(SwarmError::DependencyFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_fails_fast_without_invoking_op() {
        let r = resilience(2, 1);

        for _ in 0..2 {
            let _: SwarmResult<()> = r
                .call("scraper", |_| async { Err(DependencyError::Timeout) })
                .await;
        }

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let result: SwarmResult<()> = r
            .call("scraper", move |_| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(SwarmError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opening_mid_retry_stops_the_loop() {
        // Threshold 2, 5 attempts: the third attempt's breaker check fails.
        let r = resilience(2, 5);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        let result: SwarmResult<()> = r
            .call("llm", move |_| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DependencyError::Connection("reset".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(SwarmError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_fails_without_retry() {
        let r = resilience(5, 4);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        let result: SwarmResult<()> = r
            .call("llm", move |_| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DependencyError::InvalidInput("empty prompt".to_string()))
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(SwarmError::DependencyFailed {
                source: DependencyError::InvalidInput(_),
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
