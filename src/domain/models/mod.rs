//! Domain model types.

pub mod blackboard;
pub mod config;
pub mod message;
pub mod run;

pub use blackboard::{BlackboardEntry, BlackboardStats, DataCategory, MigrationMode};
pub use config::{
    BlackboardConfig, BreakerConfig, BusConfig, ConsensusConfig, DatabaseConfig, LimitsConfig,
    LoggingConfig, RetryConfig, SwarmConfig,
};
pub use message::{inbox_topic, AgentMessage, MessageKind, MessagePriority, Recipient};
pub use run::{
    CommStats, Insight, InsightPriority, RunFilter, RunLimits, RunMeta, RunRecord, RunStatus,
    TraceEvent, WorkerResult, WorkerStatus,
};
