//! Per-run context: isolated coordination state for one request.
//!
//! Every run gets a fresh blackboard, message bus, collaboration manager,
//! delegation manager, observer channel, concurrency ceilings, and
//! cancellation flag. Nothing here is shared between runs; only the run
//! store handle points at shared infrastructure.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore, SemaphorePermit};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::models::run::{RunLimits, RunMeta, TraceEvent};
use crate::domain::ports::{BlackboardBackend, RunStore};
use crate::services::blackboard::Blackboard;
use crate::services::collaboration::{CollaborationConfig, CollaborationManager};
use crate::services::delegation::TaskDelegationManager;
use crate::services::message_bus::{MessageBus, MessageBusConfig};
use crate::services::swarm_events::SwarmEventBus;

/// Shared infrastructure a run context is built from.
pub struct RunContextDeps {
    pub run_store: Arc<dyn RunStore>,
    pub blackboard_backend: Arc<dyn BlackboardBackend>,
    pub collaboration: CollaborationConfig,
    pub bus: MessageBusConfig,
}

pub struct RunContext {
    meta: RunMeta,
    limits: RunLimits,
    blackboard: Blackboard,
    bus: MessageBus,
    collaboration: CollaborationManager,
    delegation: TaskDelegationManager,
    run_store: Arc<dyn RunStore>,
    events: SwarmEventBus,
    llm_slots: Semaphore,
    scrape_slots: Semaphore,
    cancel_tx: watch::Sender<Option<String>>,
    trace: tokio::sync::RwLock<Vec<TraceEvent>>,
}

impl RunContext {
    /// Create and register a new run.
    pub async fn create(
        target: impl Into<String>,
        user_id: Option<String>,
        limits: RunLimits,
        deps: RunContextDeps,
    ) -> SwarmResult<Arc<Self>> {
        let meta = RunMeta::new(target, user_id);
        deps.run_store.create_run(&meta).await?;

        let events = SwarmEventBus::default();
        let (cancel_tx, _) = watch::channel(None);

        let ctx = Arc::new(Self {
            blackboard: Blackboard::new(deps.blackboard_backend, events.clone()),
            bus: MessageBus::new(deps.bus, events.clone()),
            collaboration: CollaborationManager::new(deps.collaboration, events.clone()),
            delegation: TaskDelegationManager::new(),
            run_store: deps.run_store,
            llm_slots: Semaphore::new(limits.llm_concurrency),
            scrape_slots: Semaphore::new(limits.scrape_concurrency),
            cancel_tx,
            trace: tokio::sync::RwLock::new(Vec::new()),
            events,
            meta,
            limits,
        });

        info!(run_id = %ctx.meta.run_id, target = %ctx.meta.target, "run context created");
        Ok(ctx)
    }

    pub fn run_id(&self) -> Uuid {
        self.meta.run_id
    }

    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    pub fn limits(&self) -> &RunLimits {
        &self.limits
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn collaboration(&self) -> &CollaborationManager {
        &self.collaboration
    }

    pub fn delegation(&self) -> &TaskDelegationManager {
        &self.delegation
    }

    pub fn run_store(&self) -> &Arc<dyn RunStore> {
        &self.run_store
    }

    pub fn events(&self) -> &SwarmEventBus {
        &self.events
    }

    /// Acquire a language-model slot, respecting cancellation.
    pub async fn acquire_llm_slot(&self) -> SwarmResult<SemaphorePermit<'_>> {
        self.acquire_slot(&self.llm_slots).await
    }

    /// Acquire a scrape/search slot, respecting cancellation.
    pub async fn acquire_scrape_slot(&self) -> SwarmResult<SemaphorePermit<'_>> {
        self.acquire_slot(&self.scrape_slots).await
    }

    async fn acquire_slot<'a>(&self, sem: &'a Semaphore) -> SwarmResult<SemaphorePermit<'a>> {
        tokio::select! {
            permit = sem.acquire() => permit.map_err(|_| SwarmError::Cancelled {
                reason: "run torn down".to_string(),
            }),
            reason = self.cancelled() => Err(SwarmError::Cancelled { reason }),
        }
    }

    /// Request cooperative cancellation. Idempotent; the first call wins,
    /// sets the cross-process marker, and records a trace event.
    pub async fn cancel(&self, reason: &str) {
        let flipped = self.cancel_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason.to_string());
                true
            } else {
                false
            }
        });
        if !flipped {
            return;
        }

        info!(run_id = %self.meta.run_id, reason, "run cancellation requested");
        if let Err(err) = self.run_store.request_cancel(self.meta.run_id, reason).await {
            warn!(run_id = %self.meta.run_id, error = %err, "failed to persist cancel marker");
        }
        self.trace(
            TraceEvent::new("run_cancel_requested")
                .with_data(serde_json::json!({ "reason": reason })),
        )
        .await;
    }

    /// Resolves with the cancellation reason once the run is cancelled.
    pub async fn cancelled(&self) -> String {
        let mut rx = self.cancel_tx.subscribe();
        let changed = rx.wait_for(|v| v.is_some()).await;
        match changed {
            Ok(value) => value.clone().unwrap_or_default(),
            // Sender lives as long as self; closure means teardown.
            Err(_) => "run torn down".to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_tx.borrow().is_some()
    }

    /// Fail fast if cancelled, checking the local flag first and then the
    /// cross-process marker in the run store.
    pub async fn check_cancelled(&self) -> SwarmResult<()> {
        if let Some(reason) = self.cancel_tx.borrow().clone() {
            return Err(SwarmError::Cancelled { reason });
        }

        match self.run_store.cancel_requested(self.meta.run_id).await {
            Ok(Some(reason)) => {
                // Adopt the external marker locally so in-flight work unwinds.
                self.cancel_tx.send_if_modified(|current| {
                    if current.is_none() {
                        *current = Some(reason.clone());
                        true
                    } else {
                        false
                    }
                });
                Err(SwarmError::Cancelled { reason })
            }
            Ok(None) => Ok(()),
            Err(err) => {
                warn!(run_id = %self.meta.run_id, error = %err, "cancel marker poll failed");
                Ok(())
            }
        }
    }

    /// Race a dependency call against the per-call timeout and cancellation.
    pub async fn with_call_timeout<T, F>(&self, dependency: &str, fut: F) -> SwarmResult<T>
    where
        F: std::future::Future<Output = SwarmResult<T>>,
    {
        tokio::select! {
            reason = self.cancelled() => Err(SwarmError::Cancelled { reason }),
            result = tokio::time::timeout(self.limits.call_timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(SwarmError::DependencyFailed {
                    dependency: dependency.to_string(),
                    source: crate::domain::errors::DependencyError::Timeout,
                }),
            },
        }
    }

    /// Record a trace event locally and mirror it into the run store.
    pub async fn trace(&self, event: TraceEvent) {
        {
            let mut trace = self.trace.write().await;
            trace.push(event.clone());
        }
        if let Err(err) = self.run_store.append_trace(self.meta.run_id, &event).await {
            warn!(run_id = %self.meta.run_id, error = %err, "failed to mirror trace event");
        }
    }

    pub async fn trace_log(&self) -> Vec<TraceEvent> {
        self.trace.read().await.clone()
    }
}
