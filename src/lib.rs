//! Waggle - Multi-Agent Coordination Runtime
//!
//! Waggle runs swarms of cooperating workers through phased plans with a
//! shared blackboard, direct and broadcast messaging, consensus sessions,
//! and per-dependency failure isolation.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, errors, and port traits
//! - **Service Layer** (`services`): Orchestration and coordination logic
//! - **Adapters** (`adapters`): In-memory and `SQLite` storage backends
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use waggle::adapters::MemoryRunStore;
//! use waggle::domain::models::RunLimits;
//! use waggle::services::{
//!     CollaborationConfig, MemoryBlackboard, MessageBusConfig, Orchestrator, PhasePlan,
//!     RunContext, RunContextDeps,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = RunContext::create(
//!         "https://example.com",
//!         None,
//!         RunLimits::default(),
//!         RunContextDeps {
//!             run_store: Arc::new(MemoryRunStore::new()),
//!             blackboard_backend: Arc::new(MemoryBlackboard::new()),
//!             collaboration: CollaborationConfig::default(),
//!             bus: MessageBusConfig::default(),
//!         },
//!     )
//!     .await?;
//!
//!     let orchestrator = Orchestrator::new();
//!     let plan = PhasePlan::new(vec![]);
//!     let outcome = orchestrator.execute(ctx, &plan).await?;
//!     println!("{:?}", outcome.status);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DependencyError, SwarmError, SwarmResult};
pub use domain::models::{
    AgentMessage, BlackboardEntry, DataCategory, MigrationMode, RunLimits, RunStatus, SwarmConfig,
    WorkerResult,
};
pub use domain::ports::{BlackboardBackend, RunStore, Worker};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::logging::init_logging;
pub use services::{Orchestrator, PhasePlan, RunContext, RunContextDeps, RunOutcome};
