//! Phase-barrier orchestration of a worker swarm.
//!
//! A `PhasePlan` is an ordered list of phases; workers within a phase run
//! concurrently and the phase completes only when every worker has
//! finished (or timed out). Worker failures and timeouts are recorded as
//! failed results and never block the barrier; only the run deadline and
//! cancellation end a run early. Completing all phases is a `Completed`
//! run even when individual workers failed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::models::run::{Insight, RunStatus, TraceEvent, WorkerResult};
use crate::domain::ports::Worker;
use crate::services::run_context::RunContext;
use crate::services::swarm_events::SwarmEventData;

/// Ordered phases of worker ids.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    pub phases: Vec<Vec<String>>,
}

impl PhasePlan {
    pub fn new(phases: Vec<Vec<String>>) -> Self {
        Self { phases }
    }

    pub fn worker_count(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    pub fn distinct_workers(&self) -> HashSet<&str> {
        self.phases
            .iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// Aggregated result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub results: Vec<WorkerResult>,
    pub insights: Vec<Insight>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Drives registered workers through a phase plan.
pub struct Orchestrator {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(worker.id().to_string(), worker);
        self
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.id().to_string(), worker);
    }

    /// Execute `plan` under `ctx` to a terminal status.
    ///
    /// Returns `Ok` with the aggregated outcome for every run that started,
    /// including runs that timed out or were cancelled; `Err` is reserved
    /// for plan validation and store failures.
    pub async fn execute(&self, ctx: Arc<RunContext>, plan: &PhasePlan) -> SwarmResult<RunOutcome> {
        self.validate(&ctx, plan).await?;

        let started = Instant::now();
        let run_id = ctx.run_id();
        ctx.run_store().set_status(run_id, RunStatus::Running).await?;
        ctx.trace(
            TraceEvent::new("run_started")
                .with_data(serde_json::json!({ "phases": plan.phases.len() })),
        )
        .await;
        info!(run_id = %run_id, phases = plan.phases.len(), "run started");

        let deadline = tokio::time::Instant::now() + ctx.limits().run_timeout;
        let mut results: Vec<WorkerResult> = Vec::new();

        for (phase_idx, phase) in plan.phases.iter().enumerate() {
            // Cross-process cancel marker is polled at each barrier.
            if let Err(SwarmError::Cancelled { reason }) = ctx.check_cancelled().await {
                return self
                    .finalize(&ctx, started, results, RunStatus::Cancelled, Some(reason))
                    .await;
            }

            let mut join_set: JoinSet<WorkerResult> = JoinSet::new();
            for worker_id in phase {
                // Validation guarantees registration.
                let Some(worker) = self.workers.get(worker_id).cloned() else {
                    continue;
                };
                join_set.spawn(run_worker(Arc::clone(&ctx), worker));
            }

            let mut completed: HashSet<String> = HashSet::new();
            let ended_early = loop {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {
                        ctx.cancel("run timeout").await;
                        break Some((
                            RunStatus::Failed,
                            format!(
                                "run timed out after {}s",
                                ctx.limits().run_timeout.as_secs()
                            ),
                        ));
                    }
                    reason = ctx.cancelled() => {
                        break Some((RunStatus::Cancelled, reason));
                    }
                    joined = join_set.join_next() => match joined {
                        Some(Ok(result)) => {
                            completed.insert(result.worker_id.clone());
                            results.push(result);
                        }
                        Some(Err(err)) => {
                            // A panicked worker task; the phase goes on.
                            error!(run_id = %run_id, error = %err, "worker task aborted");
                        }
                        None => break None,
                    },
                }
            };

            if let Some((status, reason)) = ended_early {
                join_set.abort_all();
                while join_set.join_next().await.is_some() {}
                for worker_id in phase {
                    if !completed.contains(worker_id) {
                        results.push(WorkerResult::cancelled(worker_id));
                    }
                }
                ctx.trace(
                    TraceEvent::new("run_cancelled")
                        .with_data(serde_json::json!({ "reason": reason })),
                )
                .await;
                return self.finalize(&ctx, started, results, status, Some(reason)).await;
            }

            ctx.trace(
                TraceEvent::new("phase_completed")
                    .with_data(serde_json::json!({ "phase": phase_idx })),
            )
            .await;
        }

        self.finalize(&ctx, started, results, RunStatus::Completed, None)
            .await
    }

    async fn validate(&self, ctx: &RunContext, plan: &PhasePlan) -> SwarmResult<()> {
        if plan.phases.is_empty() || plan.phases.iter().any(Vec::is_empty) {
            return Err(SwarmError::InvalidPlan(
                "plan must contain at least one phase and no empty phases".to_string(),
            ));
        }
        for worker_id in plan.phases.iter().flatten() {
            if !self.workers.contains_key(worker_id) {
                return Err(SwarmError::WorkerNotFound(worker_id.clone()));
            }
        }

        let mut agents_consulted: Vec<String> = plan
            .distinct_workers()
            .into_iter()
            .map(String::from)
            .collect();
        agents_consulted.sort();
        ctx.events().emit(SwarmEventData::PlanValidated {
            agents_consulted,
            phases_count: plan.phases.len(),
            tasks_count: plan.worker_count(),
        });
        Ok(())
    }

    async fn finalize(
        &self,
        ctx: &RunContext,
        started: Instant,
        mut results: Vec<WorkerResult>,
        status: RunStatus,
        error: Option<String>,
    ) -> SwarmResult<RunOutcome> {
        for result in &mut results {
            result.comm_stats = ctx.bus().comm_stats(&result.worker_id).await;
        }
        let insights = results
            .iter()
            .flat_map(|r| r.insights.iter().cloned())
            .collect();

        let outcome = RunOutcome {
            run_id: ctx.run_id(),
            status,
            results,
            insights,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        };

        let run_id = ctx.run_id();
        ctx.run_store()
            .set_result(run_id, &serde_json::to_value(&outcome)?)
            .await?;
        ctx.run_store().set_status(run_id, status).await?;
        ctx.trace(
            TraceEvent::new("run_completed")
                .with_data(serde_json::json!({ "status": status.as_str() })),
        )
        .await;

        info!(
            run_id = %run_id,
            status = %status,
            duration_ms = outcome.duration_ms,
            workers = outcome.results.len(),
            "run finished"
        );
        Ok(outcome)
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one worker under its timeout, converting every failure mode into a
/// recorded `WorkerResult`.
async fn run_worker(ctx: Arc<RunContext>, worker: Arc<dyn Worker>) -> WorkerResult {
    let worker_id = worker.id().to_string();
    let timeout = ctx.limits().worker_timeout_for(&worker_id);
    let started = Instant::now();

    ctx.trace(TraceEvent::new("worker_started").with_worker(&worker_id))
        .await;

    let mut result = tokio::select! {
        reason = ctx.cancelled() => {
            let mut r = WorkerResult::cancelled(&worker_id);
            r.error = Some(reason);
            r
        }
        outcome = tokio::time::timeout(timeout, worker.execute(Arc::clone(&ctx))) => {
            match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => {
                    warn!(worker_id = %worker_id, error = %err, "worker failed");
                    WorkerResult::failed(&worker_id, err.to_string())
                }
                Err(_) => {
                    warn!(
                        worker_id = %worker_id,
                        timeout_secs = timeout.as_secs(),
                        "worker timed out"
                    );
                    WorkerResult::timed_out(&worker_id, timeout)
                }
            }
        }
    };
    result.duration_ms = started.elapsed().as_millis() as u64;

    ctx.trace(
        TraceEvent::new("worker_completed")
            .with_worker(&worker_id)
            .with_data(serde_json::json!({ "status": result.status })),
    )
    .await;
    result
}
