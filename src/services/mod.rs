//! Coordination services: orchestration, messaging, shared state, and
//! failure isolation.

pub mod blackboard;
pub mod circuit_breaker;
pub mod collaboration;
pub mod delegation;
pub mod hybrid_blackboard;
pub mod message_bus;
pub mod orchestrator;
pub mod resilience;
pub mod retry;
pub mod run_context;
pub mod swarm_events;

pub use blackboard::{Blackboard, MemoryBlackboard};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitCheck, CircuitSnapshot,
    CircuitState,
};
pub use collaboration::{
    mean_confidence, CollaborationConfig, CollaborationManager, CollaborationSession,
    ConfidenceAggregator, SessionOutcome, Turn,
};
pub use delegation::{DelegationOutcome, DelegationTask, TaskDelegationManager, WorkerProfile};
pub use hybrid_blackboard::HybridBlackboard;
pub use message_bus::{BusStats, MessageBus, MessageBusConfig, MessageStream};
pub use orchestrator::{Orchestrator, PhasePlan, RunOutcome};
pub use resilience::Resilience;
pub use retry::RetryPolicy;
pub use run_context::{RunContext, RunContextDeps};
pub use swarm_events::{SwarmEventBus, SwarmEventData, SwarmEventEnvelope};
