//! In-memory run store for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::models::run::{RunFilter, RunMeta, RunRecord, RunStatus, TraceEvent};
use crate::domain::ports::RunStore;

/// How long a cancellation marker stays valid before it is ignored.
pub(crate) fn cancel_marker_ttl() -> Duration {
    Duration::minutes(2)
}

struct StoredRun {
    record: RunRecord,
    cancel: Option<(String, DateTime<Utc>)>,
}

pub struct MemoryRunStore {
    runs: Arc<RwLock<HashMap<Uuid, StoredRun>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, meta: &RunMeta) -> SwarmResult<()> {
        let mut runs = self.runs.write().await;
        runs.insert(
            meta.run_id,
            StoredRun {
                record: RunRecord {
                    meta: meta.clone(),
                    status: RunStatus::Pending,
                    result: None,
                    trace: Vec::new(),
                },
                cancel: None,
            },
        );
        Ok(())
    }

    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> SwarmResult<()> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(SwarmError::RunNotFound(run_id))?;

        if !run.record.status.can_transition(status) {
            return Err(SwarmError::InvalidStateTransition {
                from: run.record.status,
                to: status,
            });
        }
        run.record.status = status;
        if status.is_terminal() && run.record.meta.completed_at.is_none() {
            run.record.meta.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_result(&self, run_id: Uuid, result: &serde_json::Value) -> SwarmResult<()> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(SwarmError::RunNotFound(run_id))?;
        run.record.result = Some(result.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> SwarmResult<Option<RunRecord>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).map(|r| RunRecord {
            meta: r.record.meta.clone(),
            status: r.record.status,
            result: r.record.result.clone(),
            trace: r.record.trace.clone(),
        }))
    }

    async fn list_runs(&self, filter: &RunFilter) -> SwarmResult<Vec<RunRecord>> {
        let runs = self.runs.read().await;
        let mut matching: Vec<&StoredRun> = runs
            .values()
            .filter(|r| filter.status.is_none_or(|s| r.record.status == s))
            .filter(|r| {
                filter
                    .user_id
                    .as_ref()
                    .is_none_or(|u| r.record.meta.user_id.as_ref() == Some(u))
            })
            .collect();
        matching.sort_by(|a, b| b.record.meta.created_at.cmp(&a.record.meta.created_at));

        let limit = if filter.limit == 0 { usize::MAX } else { filter.limit };
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .map(|r| RunRecord {
                meta: r.record.meta.clone(),
                status: r.record.status,
                result: r.record.result.clone(),
                trace: Vec::new(),
            })
            .collect())
    }

    async fn request_cancel(&self, run_id: Uuid, reason: &str) -> SwarmResult<()> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(SwarmError::RunNotFound(run_id))?;
        if run.cancel.is_none() {
            run.cancel = Some((reason.to_string(), Utc::now() + cancel_marker_ttl()));
        }
        Ok(())
    }

    async fn cancel_requested(&self, run_id: Uuid) -> SwarmResult<Option<String>> {
        let runs = self.runs.read().await;
        let run = runs.get(&run_id).ok_or(SwarmError::RunNotFound(run_id))?;
        Ok(run
            .cancel
            .as_ref()
            .filter(|(_, expires)| *expires > Utc::now())
            .map(|(reason, _)| reason.clone()))
    }

    async fn append_trace(&self, run_id: Uuid, event: &TraceEvent) -> SwarmResult<()> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(SwarmError::RunNotFound(run_id))?;
        run.record.trace.push(event.clone());
        Ok(())
    }

    async fn get_trace(&self, run_id: Uuid) -> SwarmResult<Vec<TraceEvent>> {
        let runs = self.runs.read().await;
        let run = runs.get(&run_id).ok_or(SwarmError::RunNotFound(run_id))?;
        Ok(run.record.trace.clone())
    }
}
