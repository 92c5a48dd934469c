//! Domain errors for the waggle coordination runtime.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::run::RunStatus;

/// Classification of a downstream dependency failure.
///
/// The retry layer only retries transient kinds; `InvalidInput` fails
/// immediately and is never handed back to the dependency.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("dependency call timed out")]
    Timeout,

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("rate limited by dependency")]
    RateLimited,

    #[error("invalid input rejected by dependency: {0}")]
    InvalidInput(String),

    #[error("dependency failure: {0}")]
    Other(String),
}

impl DependencyError {
    /// Transient failures are worth retrying; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection(_) | Self::RateLimited
        )
    }
}

/// Domain-level errors that can occur in the waggle runtime.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Worker {worker_id} failed: {reason}")]
    WorkerFailed { worker_id: String, reason: String },

    #[error("Dependency '{dependency}' failed: {source}")]
    DependencyFailed {
        dependency: String,
        #[source]
        source: DependencyError,
    },

    #[error("Circuit open for '{dependency}', retry after {retry_after}")]
    CircuitOpen {
        dependency: String,
        retry_after: DateTime<Utc>,
    },

    #[error("Run timed out after {timeout_secs}s")]
    RunTimeout { timeout_secs: u64 },

    #[error("Worker {worker_id} timed out after {timeout_secs}s")]
    WorkerTimeout { worker_id: String, timeout_secs: u64 },

    #[error("Run cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStateTransition { from: RunStatus, to: RunStatus },

    #[error("Collaboration session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session {0} already concluded")]
    SessionConcluded(Uuid),

    #[error("Not a session participant: {0}")]
    NotAParticipant(String),

    #[error("Invalid phase plan: {0}")]
    InvalidPlan(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type SwarmResult<T> = Result<T, SwarmError>;

impl From<sqlx::Error> for SwarmError {
    fn from(err: sqlx::Error) -> Self {
        SwarmError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        SwarmError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(DependencyError::Timeout.is_transient());
        assert!(DependencyError::Connection("reset".into()).is_transient());
        assert!(DependencyError::RateLimited.is_transient());
        assert!(!DependencyError::InvalidInput("bad url".into()).is_transient());
        assert!(!DependencyError::Other("boom".into()).is_transient());
    }
}
