//! Port traits: seams between the coordination core and its pluggable parts.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::errors::SwarmResult;
use crate::domain::models::blackboard::{BlackboardEntry, BlackboardStats, DataCategory};
use crate::domain::models::run::{RunFilter, RunMeta, RunRecord, RunStatus, TraceEvent, WorkerResult};
use crate::services::run_context::RunContext;

/// A specialized worker executed by the orchestrator.
///
/// Workers receive the per-run context and use it for shared state, the
/// message bus, concurrency slots, and cancellation. Business logic lives
/// behind this trait; the runtime only cares about the returned result.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identifier, unique within a run plan.
    fn id(&self) -> &str;

    async fn execute(&self, ctx: Arc<RunContext>) -> SwarmResult<WorkerResult>;
}

/// Storage backend for the blackboard.
///
/// `write` assigns the next version for the key atomically; `write_at`
/// stores an entry whose version was already assigned by another backend
/// (the dual-write path during migration).
#[async_trait]
pub trait BlackboardBackend: Send + Sync {
    async fn write(
        &self,
        key: &str,
        category: DataCategory,
        value: serde_json::Value,
        source: &str,
        ttl: Option<chrono::Duration>,
    ) -> SwarmResult<BlackboardEntry>;

    async fn write_at(&self, entry: BlackboardEntry) -> SwarmResult<()>;

    /// Latest non-expired entry for the key, if any.
    async fn read(&self, key: &str) -> SwarmResult<Option<BlackboardEntry>>;

    /// Non-expired entries in a category, newest first, up to `limit`.
    async fn query(&self, category: DataCategory, limit: usize) -> SwarmResult<Vec<BlackboardEntry>>;

    /// Live change stream for a category. No history replay.
    fn subscribe(&self, category: DataCategory) -> broadcast::Receiver<BlackboardEntry>;

    /// Remove expired entries, returning how many were swept.
    async fn cleanup_expired(&self) -> SwarmResult<u64>;

    async fn stats(&self) -> BlackboardStats;
}

/// Durable registry of runs. The only component shared across runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, meta: &RunMeta) -> SwarmResult<()>;

    /// Monotonic status update; rejects transitions out of terminal states.
    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> SwarmResult<()>;

    async fn set_result(&self, run_id: Uuid, result: &serde_json::Value) -> SwarmResult<()>;

    async fn get_run(&self, run_id: Uuid) -> SwarmResult<Option<RunRecord>>;

    /// Runs matching the filter, newest first.
    async fn list_runs(&self, filter: &RunFilter) -> SwarmResult<Vec<RunRecord>>;

    /// Set the cancellation marker polled by orchestrators. Idempotent.
    async fn request_cancel(&self, run_id: Uuid, reason: &str) -> SwarmResult<()>;

    /// The pending cancellation reason, if the marker is set and unexpired.
    async fn cancel_requested(&self, run_id: Uuid) -> SwarmResult<Option<String>>;

    async fn append_trace(&self, run_id: Uuid, event: &TraceEvent) -> SwarmResult<()>;

    async fn get_trace(&self, run_id: Uuid) -> SwarmResult<Vec<TraceEvent>>;
}
