//! Circuit breakers for unreliable downstream dependencies.
//!
//! One breaker per named dependency. A breaker counts *consecutive*
//! failures: any success while closed resets the count. At
//! `failure_threshold` the circuit opens and calls fail fast; after
//! `cooldown` the next check moves it to half-open, where
//! `success_threshold` consecutive successes close it again and any
//! failure reopens it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Configuration shared by all breakers in a registry.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::seconds(30),
        }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Breaker state for one dependency.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_count: u32,
    pub last_error: Option<String>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
            open_count: 0,
            last_error: None,
        }
    }

    pub fn record_failure(&mut self, error: impl Into<String>, config: &CircuitBreakerConfig) {
        self.last_error = Some(error.into());
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= config.failure_threshold {
                    self.open();
                }
            }
            // Any half-open failure reopens immediately.
            CircuitState::HalfOpen => self.open(),
            CircuitState::Open => {}
        }
    }

    pub fn record_success(&mut self, config: &CircuitBreakerConfig) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= config.success_threshold {
                    self.close();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Utc::now());
        self.half_open_successes = 0;
        self.open_count += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.consecutive_failures = 0;
        self.half_open_successes = 0;
    }

    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.half_open_successes = 0;
    }

    /// Whether a call may proceed, moving Open → HalfOpen once the
    /// cooldown has elapsed.
    pub fn allows(&mut self, config: &CircuitBreakerConfig) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match self.opened_at {
                Some(opened_at) if Utc::now() >= opened_at + config.cooldown => {
                    self.half_open();
                    true
                }
                _ => false,
            },
        }
    }

    /// Earliest time a rejected call may be retried.
    pub fn retry_after(&self, config: &CircuitBreakerConfig) -> DateTime<Utc> {
        self.opened_at.unwrap_or_else(Utc::now) + config.cooldown
    }

    pub fn reset(&mut self) {
        self.close();
        self.open_count = 0;
        self.last_error = None;
    }
}

/// Outcome of a pre-call breaker check.
#[derive(Debug, Clone)]
pub enum CircuitCheck {
    Allowed,
    /// Call rejected without touching the dependency.
    Open { retry_after: DateTime<Utc> },
}

impl CircuitCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Snapshot of one breaker for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub dependency: String,
    pub state: &'static str,
    pub consecutive_failures: u32,
    pub open_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Registry of breakers keyed by dependency name.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Check whether a call to `dependency` may proceed.
    pub async fn check(&self, dependency: &str) -> CircuitCheck {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitBreaker::new(dependency));

        if circuit.allows(&self.config) {
            CircuitCheck::Allowed
        } else {
            CircuitCheck::Open {
                retry_after: circuit.retry_after(&self.config),
            }
        }
    }

    pub async fn record_failure(&self, dependency: &str, error: impl Into<String>) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitBreaker::new(dependency));

        let was_open = circuit.state == CircuitState::Open;
        circuit.record_failure(error, &self.config);
        if !was_open && circuit.state == CircuitState::Open {
            warn!(
                dependency,
                open_count = circuit.open_count,
                "circuit opened"
            );
        }
    }

    pub async fn record_success(&self, dependency: &str) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(dependency) {
            let was_closed = circuit.state == CircuitState::Closed;
            circuit.record_success(&self.config);
            if !was_closed && circuit.state == CircuitState::Closed {
                info!(dependency, "circuit closed after recovery");
            }
        }
    }

    pub async fn state(&self, dependency: &str) -> Option<CircuitState> {
        let circuits = self.circuits.read().await;
        circuits.get(dependency).map(|c| c.state)
    }

    pub async fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let circuits = self.circuits.read().await;
        circuits
            .values()
            .map(|c| CircuitSnapshot {
                dependency: c.dependency.clone(),
                state: c.state.as_str(),
                consecutive_failures: c.consecutive_failures,
                open_count: c.open_count,
                opened_at: c.opened_at,
            })
            .collect()
    }

    pub async fn reset(&self, dependency: &str) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(dependency) {
            circuit.reset();
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failures: u32, successes: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            cooldown: Duration::seconds(30),
        }
    }

    #[test]
    fn opens_exactly_at_threshold() {
        let config = config(3, 2);
        let mut circuit = CircuitBreaker::new("llm");

        circuit.record_failure("e1", &config);
        circuit.record_failure("e2", &config);
        assert_eq!(circuit.state, CircuitState::Closed);

        circuit.record_failure("e3", &config);
        assert_eq!(circuit.state, CircuitState::Open);
        assert_eq!(circuit.open_count, 1);
    }

    #[test]
    fn success_resets_consecutive_count() {
        let config = config(3, 2);
        let mut circuit = CircuitBreaker::new("llm");

        circuit.record_failure("e1", &config);
        circuit.record_failure("e2", &config);
        circuit.record_success(&config);
        circuit.record_failure("e3", &config);
        circuit.record_failure("e4", &config);
        // Interleaved success means the streak never reached 3.
        assert_eq!(circuit.state, CircuitState::Closed);
    }

    #[test]
    fn open_circuit_blocks_until_cooldown() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            cooldown: Duration::hours(1),
        };
        let mut circuit = CircuitBreaker::new("llm");
        circuit.record_failure("e", &config);

        assert!(!circuit.allows(&config));
        assert_eq!(circuit.state, CircuitState::Open);
    }

    #[test]
    fn cooldown_elapse_moves_to_half_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            cooldown: Duration::zero(),
        };
        let mut circuit = CircuitBreaker::new("llm");
        circuit.record_failure("e", &config);

        assert!(circuit.allows(&config));
        assert_eq!(circuit.state, CircuitState::HalfOpen);

        circuit.record_success(&config);
        assert_eq!(circuit.state, CircuitState::HalfOpen);
        circuit.record_success(&config);
        assert_eq!(circuit.state, CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            cooldown: Duration::zero(),
        };
        let mut circuit = CircuitBreaker::new("llm");
        circuit.record_failure("e1", &config);
        assert!(circuit.allows(&config)); // half-open

        circuit.record_failure("e2", &config);
        assert_eq!(circuit.state, CircuitState::Open);
        assert_eq!(circuit.open_count, 2);
    }

    #[tokio::test]
    async fn registry_sixth_call_rejected_without_invocation() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::hours(1),
        });

        for i in 0..5 {
            assert!(registry.check("scraper").await.is_allowed(), "call {i}");
            registry.record_failure("scraper", "boom").await;
        }

        match registry.check("scraper").await {
            CircuitCheck::Open { retry_after } => assert!(retry_after > Utc::now()),
            CircuitCheck::Allowed => panic!("sixth call should be rejected"),
        }
    }

    #[tokio::test]
    async fn registry_isolates_dependencies() {
        let registry = CircuitBreakerRegistry::new(config(1, 1));
        registry.record_failure("scraper", "down").await;

        assert!(!registry.check("scraper").await.is_allowed());
        assert!(registry.check("llm").await.is_allowed());
    }
}
