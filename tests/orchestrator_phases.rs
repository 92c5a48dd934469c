//! Integration tests for phased orchestration: barrier ordering, partial
//! success, and run-level deadlines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use waggle::adapters::MemoryRunStore;
use waggle::domain::models::run::WorkerStatus;
use waggle::domain::models::RunLimits;
use waggle::domain::ports::Worker;
use waggle::services::{
    CollaborationConfig, MemoryBlackboard, MessageBusConfig, Orchestrator, PhasePlan, RunContext,
    RunContextDeps,
};
use waggle::{RunStatus, SwarmResult, WorkerResult};

/// Worker that appends its id to a shared log, then succeeds.
struct RecordingWorker {
    id: String,
    delay: Duration,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Worker for RecordingWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _ctx: Arc<RunContext>) -> SwarmResult<WorkerResult> {
        tokio::time::sleep(self.delay).await;
        self.log
            .lock()
            .unwrap()
            .push(self.id.clone());
        Ok(WorkerResult::succeeded(&self.id, serde_json::json!({})))
    }
}

fn recording(id: &str, delay_ms: u64, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Worker> {
    Arc::new(RecordingWorker {
        id: id.to_string(),
        delay: Duration::from_millis(delay_ms),
        log: Arc::clone(log),
    })
}

async fn make_ctx(limits: RunLimits) -> Arc<RunContext> {
    RunContext::create(
        "https://example.com",
        None,
        limits,
        RunContextDeps {
            run_store: Arc::new(MemoryRunStore::new()),
            blackboard_backend: Arc::new(MemoryBlackboard::new()),
            collaboration: CollaborationConfig::default(),
            bus: MessageBusConfig::default(),
        },
    )
    .await
    .unwrap()
}

fn plan(phases: &[&[&str]]) -> PhasePlan {
    PhasePlan::new(
        phases
            .iter()
            .map(|phase| phase.iter().map(|s| (*s).to_string()).collect())
            .collect(),
    )
}

#[tokio::test]
async fn phases_run_in_order_with_concurrency_inside_a_phase() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Orchestrator::new()
        .with_worker(recording("a", 5, &log))
        .with_worker(recording("b", 5, &log))
        .with_worker(recording("c", 40, &log))
        .with_worker(recording("d", 5, &log))
        .with_worker(recording("e", 5, &log));
    let ctx = make_ctx(RunLimits::default()).await;

    let outcome = orchestrator
        .execute(ctx, &plan(&[&["a"], &["b"], &["c", "d"], &["e"]]))
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.results.len(), 5);

    let order = log.lock().unwrap().clone();
    let pos = |id: &str| order.iter().position(|x| x == id).unwrap();

    // Strict barrier: a before b, b before c and d, both before e.
    assert!(pos("a") < pos("b"));
    assert!(pos("b") < pos("c") && pos("b") < pos("d"));
    assert!(pos("c") < pos("e") && pos("d") < pos("e"));
    // Inside the phase, the fast worker finishes before the slow one.
    assert!(pos("d") < pos("c"));
}

#[tokio::test]
async fn worker_timeout_does_not_stop_later_phases() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Orchestrator::new()
        .with_worker(recording("stuck", 60_000, &log))
        .with_worker(recording("after", 5, &log));
    let ctx = make_ctx(RunLimits {
        worker_timeout: Duration::from_millis(50),
        ..RunLimits::default()
    })
    .await;

    let outcome = orchestrator
        .execute(Arc::clone(&ctx), &plan(&[&["stuck"], &["after"]]))
        .await
        .unwrap();

    // Partial success still completes the run.
    assert_eq!(outcome.status, RunStatus::Completed);

    let by_id: HashMap<_, _> = outcome
        .results
        .iter()
        .map(|r| (r.worker_id.as_str(), r.status))
        .collect();
    assert_eq!(by_id["stuck"], WorkerStatus::TimedOut);
    assert_eq!(by_id["after"], WorkerStatus::Succeeded);

    let failed = outcome
        .results
        .iter()
        .find(|r| r.worker_id == "stuck")
        .unwrap();
    assert!(failed.error.as_deref().is_some_and(|e| e.contains("timed out")));

    let record = ctx.run_store().get_run(ctx.run_id()).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
}

#[tokio::test]
async fn run_deadline_fails_the_run_and_cancels_in_flight_workers() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Orchestrator::new()
        .with_worker(recording("slow", 60_000, &log))
        .with_worker(recording("never", 5, &log));
    let ctx = make_ctx(RunLimits {
        worker_timeout: Duration::from_secs(120),
        run_timeout: Duration::from_millis(60),
        ..RunLimits::default()
    })
    .await;

    let outcome = orchestrator
        .execute(Arc::clone(&ctx), &plan(&[&["slow"], &["never"]]))
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.error.as_deref().is_some_and(|e| e.contains("timed out")));
    // The second phase never ran.
    assert!(log.lock().unwrap().is_empty());

    let trace = ctx.run_store().get_trace(ctx.run_id()).await.unwrap();
    assert!(trace.iter().any(|e| e.event_type == "run_cancel_requested"));
    assert!(trace.iter().any(|e| e.event_type == "run_cancelled"));

    let record = ctx.run_store().get_run(ctx.run_id()).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.result.is_some(), "partial results are persisted");
}

#[tokio::test]
async fn external_cancel_between_phases_is_honoured() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Orchestrator::new()
        .with_worker(recording("first", 50, &log))
        .with_worker(recording("second", 5, &log));
    let ctx = make_ctx(RunLimits::default()).await;

    // Marker lands in the store out of band; the next barrier picks it up.
    ctx.run_store()
        .request_cancel(ctx.run_id(), "operator stop")
        .await
        .unwrap();

    let outcome = orchestrator
        .execute(Arc::clone(&ctx), &plan(&[&["first"], &["second"]]))
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.error.as_deref(), Some("operator stop"));
    assert!(log.lock().unwrap().is_empty());

    let record = ctx.run_store().get_run(ctx.run_id()).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
}
