use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::models::blackboard::MigrationMode;
use crate::domain::models::run::RunLimits;

/// Main configuration structure for Waggle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SwarmConfig {
    /// Per-run concurrency and timeout limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Collaboration session configuration
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Blackboard configuration
    #[serde(default)]
    pub blackboard: BlackboardConfig,

    /// Message bus configuration
    #[serde(default)]
    pub bus: BusConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            consensus: ConsensusConfig::default(),
            blackboard: BlackboardConfig::default(),
            bus: BusConfig::default(),
        }
    }
}

/// Per-run concurrency and timeout limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Maximum concurrent language-model calls per run
    #[serde(default = "default_llm_concurrency")]
    pub llm_concurrency: usize,

    /// Maximum concurrent scrape/search calls per run
    #[serde(default = "default_scrape_concurrency")]
    pub scrape_concurrency: usize,

    /// Timeout for a single dependency call, in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Default timeout for a single worker, in seconds
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,

    /// Timeout for a whole run, in seconds
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Per-worker timeout overrides, in seconds
    #[serde(default)]
    pub worker_timeout_overrides: HashMap<String, u64>,
}

const fn default_llm_concurrency() -> usize {
    5
}

const fn default_scrape_concurrency() -> usize {
    3
}

const fn default_call_timeout_secs() -> u64 {
    60
}

const fn default_worker_timeout_secs() -> u64 {
    90
}

const fn default_run_timeout_secs() -> u64 {
    180
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            llm_concurrency: default_llm_concurrency(),
            scrape_concurrency: default_scrape_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
            worker_timeout_secs: default_worker_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            worker_timeout_overrides: HashMap::new(),
        }
    }
}

impl LimitsConfig {
    pub fn to_limits(&self) -> RunLimits {
        RunLimits {
            llm_concurrency: self.llm_concurrency,
            scrape_concurrency: self.scrape_concurrency,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            worker_timeout: Duration::from_secs(self.worker_timeout_secs),
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            worker_timeouts: self
                .worker_timeout_overrides
                .iter()
                .map(|(id, secs)| (id.clone(), Duration::from_secs(*secs)))
                .collect(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".waggle/waggle.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Half-open successes required to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Seconds the circuit stays open before probing
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_cooldown_secs() -> u64 {
    30
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential growth factor
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter fraction in [0, 1]
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Collaboration session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConsensusConfig {
    /// Seconds before a session concludes without consensus
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
}

const fn default_session_timeout_secs() -> u64 {
    60
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout_secs(),
        }
    }
}

/// Blackboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BlackboardConfig {
    /// Backend migration mode
    #[serde(default)]
    pub mode: MigrationMode,

    /// Default cap on category query results
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
}

const fn default_query_limit() -> usize {
    100
}

impl Default for BlackboardConfig {
    fn default() -> Self {
        Self {
            mode: MigrationMode::default(),
            query_limit: default_query_limit(),
        }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BusConfig {
    /// Capacity of each per-topic broadcast channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

const fn default_channel_capacity() -> usize {
    256
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}
