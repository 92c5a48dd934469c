//! Run lifecycle models: status, limits, trace, and per-worker results.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an analysis run.
///
/// Transitions are monotonic: once a run reaches a terminal state
/// (`Completed`, `Failed`, `Cancelled`) it never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition from `self` to `to` is legal.
    pub fn can_transition(&self, to: RunStatus) -> bool {
        if *self == to {
            return true; // idempotent
        }
        match self {
            Self::Pending => matches!(to, Self::Running | Self::Failed | Self::Cancelled),
            Self::Running => to.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Concurrency ceilings and the timeout hierarchy for a run.
///
/// Hierarchy, innermost to outermost: `call_timeout` < `worker_timeout`
/// < `run_timeout`. Exceeding an inner timeout is non-fatal to outer scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLimits {
    /// Max concurrent language-model calls.
    pub llm_concurrency: usize,
    /// Max concurrent scrape/search calls.
    pub scrape_concurrency: usize,
    /// Timeout for a single dependency call.
    pub call_timeout: Duration,
    /// Default timeout for a single worker execution.
    pub worker_timeout: Duration,
    /// Timeout for the whole run.
    pub run_timeout: Duration,
    /// Per-worker timeout overrides, keyed by worker id.
    #[serde(default)]
    pub worker_timeouts: HashMap<String, Duration>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            llm_concurrency: 5,
            scrape_concurrency: 3,
            call_timeout: Duration::from_secs(60),
            worker_timeout: Duration::from_secs(90),
            run_timeout: Duration::from_secs(180),
            worker_timeouts: HashMap::new(),
        }
    }
}

impl RunLimits {
    /// Timeout for a specific worker, falling back to the default.
    pub fn worker_timeout_for(&self, worker_id: &str) -> Duration {
        self.worker_timeouts
            .get(worker_id)
            .copied()
            .unwrap_or(self.worker_timeout)
    }
}

/// Metadata for a run, created on request arrival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub user_id: Option<String>,
    /// Subject under analysis (e.g. a company URL).
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunMeta {
    pub fn new(target: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            user_id,
            target: target.into(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A single event in a run's ordered trace log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub event_type: String,
    pub worker_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TraceEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            worker_id: None,
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Outcome of a single worker execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// Severity of an insight produced by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// An analytical finding surfaced by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub insight_type: String,
    pub message: String,
    pub priority: InsightPriority,
}

/// Messages sent and received by a worker during its run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CommStats {
    pub sent: u64,
    pub received: u64,
}

/// Result produced by one worker for one run.
///
/// Written once per worker per run; read by the orchestrator for aggregation.
/// The payload is opaque to the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub comm_stats: CommStats,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl WorkerResult {
    pub fn succeeded(worker_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Succeeded,
            payload,
            insights: Vec::new(),
            comm_stats: CommStats::default(),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed(worker_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Failed,
            payload: serde_json::Value::Null,
            insights: Vec::new(),
            comm_stats: CommStats::default(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn timed_out(worker_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::TimedOut,
            payload: serde_json::Value::Null,
            insights: Vec::new(),
            comm_stats: CommStats::default(),
            error: Some(format!("timed out after {}s", timeout.as_secs())),
            duration_ms: timeout.as_millis() as u64,
        }
    }

    pub fn cancelled(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Cancelled,
            payload: serde_json::Value::Null,
            insights: Vec::new(),
            comm_stats: CommStats::default(),
            error: Some("run cancelled".to_string()),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Succeeded
    }
}

/// Full persisted state of a run: meta, status, result, trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub meta: RunMeta,
    pub status: RunStatus,
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
}

/// Filter for listing runs, newest first.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub user_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl RunFilter {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        for terminal in [RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition(RunStatus::Running));
            assert!(!terminal.can_transition(RunStatus::Pending));
            // Idempotent re-set is allowed
            assert!(terminal.can_transition(terminal));
        }
    }

    #[test]
    fn pending_to_running_to_terminal() {
        assert!(RunStatus::Pending.can_transition(RunStatus::Running));
        assert!(RunStatus::Running.can_transition(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition(RunStatus::Failed));
        assert!(RunStatus::Running.can_transition(RunStatus::Cancelled));
        assert!(!RunStatus::Running.can_transition(RunStatus::Pending));
    }

    #[test]
    fn status_round_trip() {
        for s in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RunStatus::parse("bogus"), None);
    }

    #[test]
    fn worker_timeout_override() {
        let mut limits = RunLimits::default();
        limits
            .worker_timeouts
            .insert("scout".to_string(), Duration::from_secs(120));

        assert_eq!(limits.worker_timeout_for("scout"), Duration::from_secs(120));
        assert_eq!(
            limits.worker_timeout_for("analyst"),
            limits.worker_timeout
        );
    }
}
