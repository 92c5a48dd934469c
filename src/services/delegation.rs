//! Capability-based task delegation.
//!
//! Workers register a profile of capabilities; `delegate` routes a task to
//! the capable candidate with the lowest current load. Routing never
//! guesses: with no capable candidate the outcome is `Unassignable`, not
//! an error and not a fallback assignment.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::message::MessagePriority;

/// A worker's delegation profile.
#[derive(Debug, Clone)]
pub struct WorkerProfile {
    pub worker_id: String,
    pub capabilities: HashSet<String>,
    /// Tasks currently assigned and not yet completed.
    pub load: u32,
}

impl WorkerProfile {
    pub fn new<I, S>(worker_id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            worker_id: worker_id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            load: 0,
        }
    }
}

/// A task to route to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationTask {
    pub id: Uuid,
    pub description: String,
    pub required_capability: String,
    pub priority: MessagePriority,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl DelegationTask {
    pub fn new(
        description: impl Into<String>,
        required_capability: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            required_capability: required_capability.into(),
            priority: MessagePriority::default(),
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Result of a delegation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationOutcome {
    Assigned { worker_id: String },
    Unassignable { reason: String },
}

/// Per-run delegation registry.
pub struct TaskDelegationManager {
    workers: Arc<RwLock<HashMap<String, WorkerProfile>>>,
}

impl TaskDelegationManager {
    pub fn new() -> Self {
        Self {
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, profile: WorkerProfile) {
        let mut workers = self.workers.write().await;
        workers.insert(profile.worker_id.clone(), profile);
    }

    /// Route `task` to the least-loaded capable worker among `candidates`
    /// (all registered workers when `candidates` is empty), incrementing
    /// that worker's load.
    pub async fn delegate(
        &self,
        task: &DelegationTask,
        candidates: &[String],
    ) -> DelegationOutcome {
        let mut workers = self.workers.write().await;

        let eligible = workers
            .values()
            .filter(|w| candidates.is_empty() || candidates.contains(&w.worker_id))
            .filter(|w| w.capabilities.contains(&task.required_capability))
            // Ties break on id for deterministic routing.
            .min_by_key(|w| (w.load, w.worker_id.clone()))
            .map(|w| w.worker_id.clone());

        match eligible {
            Some(worker_id) => {
                if let Some(profile) = workers.get_mut(&worker_id) {
                    profile.load += 1;
                }
                debug!(
                    task_id = %task.id,
                    capability = %task.required_capability,
                    worker_id = %worker_id,
                    "task delegated"
                );
                DelegationOutcome::Assigned { worker_id }
            }
            None => DelegationOutcome::Unassignable {
                reason: format!(
                    "no candidate offers capability '{}'",
                    task.required_capability
                ),
            },
        }
    }

    /// Mark one assigned task finished for the worker.
    pub async fn complete(&self, worker_id: &str) {
        let mut workers = self.workers.write().await;
        if let Some(profile) = workers.get_mut(worker_id) {
            profile.load = profile.load.saturating_sub(1);
        }
    }

    pub async fn load_of(&self, worker_id: &str) -> Option<u32> {
        let workers = self.workers.read().await;
        workers.get(worker_id).map(|w| w.load)
    }
}

impl Default for TaskDelegationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> TaskDelegationManager {
        let m = TaskDelegationManager::new();
        m.register(WorkerProfile::new("scout", ["scrape", "search"])).await;
        m.register(WorkerProfile::new("analyst", ["score", "search"])).await;
        m
    }

    #[tokio::test]
    async fn routes_to_capable_worker() {
        let m = manager().await;
        let task = DelegationTask::new("score the target", "score", "orchestrator");

        let outcome = m.delegate(&task, &[]).await;
        assert_eq!(
            outcome,
            DelegationOutcome::Assigned {
                worker_id: "analyst".to_string()
            }
        );
        assert_eq!(m.load_of("analyst").await, Some(1));
    }

    #[tokio::test]
    async fn picks_least_loaded_among_capable() {
        let m = manager().await;

        // Both can search; load analyst first.
        let t1 = DelegationTask::new("t1", "score", "o");
        m.delegate(&t1, &[]).await;

        let t2 = DelegationTask::new("t2", "search", "o");
        let outcome = m.delegate(&t2, &[]).await;
        assert_eq!(
            outcome,
            DelegationOutcome::Assigned {
                worker_id: "scout".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unassignable_when_no_capability_matches() {
        let m = manager().await;
        let task = DelegationTask::new("render report", "render", "o");

        match m.delegate(&task, &[]).await {
            DelegationOutcome::Unassignable { reason } => {
                assert!(reason.contains("render"));
            }
            other => panic!("expected unassignable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn candidate_list_restricts_routing() {
        let m = manager().await;
        let task = DelegationTask::new("search", "search", "o");

        let outcome = m.delegate(&task, &["analyst".to_string()]).await;
        assert_eq!(
            outcome,
            DelegationOutcome::Assigned {
                worker_id: "analyst".to_string()
            }
        );
    }

    #[tokio::test]
    async fn complete_decrements_load() {
        let m = manager().await;
        let task = DelegationTask::new("t", "scrape", "o");
        m.delegate(&task, &[]).await;
        assert_eq!(m.load_of("scout").await, Some(1));

        m.complete("scout").await;
        assert_eq!(m.load_of("scout").await, Some(0));

        // Completing with no assignments stays at zero.
        m.complete("scout").await;
        assert_eq!(m.load_of("scout").await, Some(0));
    }
}
