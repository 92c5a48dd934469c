use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::SwarmConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid concurrency limit: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    #[error("Invalid timeout: {0}s. Must be positive")]
    InvalidTimeout(u64),

    #[error("Worker timeout ({0}s) must not exceed run timeout ({1}s)")]
    WorkerTimeoutExceedsRun(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid breaker threshold: {0}. Must be at least 1")]
    InvalidThreshold(u32),

    #[error("Invalid max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),

    #[error("Invalid backoff: base_delay_ms ({0}) must not exceed max_delay_ms ({1})")]
    InvalidBackoff(u64, u64),

    #[error("Invalid jitter: {0}. Must be in [0, 1]")]
    InvalidJitter(f64),

    #[error("Invalid multiplier: {0}. Must be at least 1.0")]
    InvalidMultiplier(f64),

    #[error("Invalid query_limit: {0}. Must be at least 1")]
    InvalidQueryLimit(usize),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. waggle.yaml (project config)
    /// 3. waggle.local.yaml (local overrides, optional)
    /// 4. Environment variables (`WAGGLE_` prefix, highest priority)
    pub fn load() -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file("waggle.yaml"))
            .merge(Yaml::file("waggle.local.yaml"))
            .merge(Env::prefixed("WAGGLE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &SwarmConfig) -> Result<(), ConfigError> {
        if config.limits.llm_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(
                config.limits.llm_concurrency,
            ));
        }
        if config.limits.scrape_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(
                config.limits.scrape_concurrency,
            ));
        }
        for timeout in [
            config.limits.call_timeout_secs,
            config.limits.worker_timeout_secs,
            config.limits.run_timeout_secs,
        ] {
            if timeout == 0 {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
        }
        if config.limits.worker_timeout_secs > config.limits.run_timeout_secs {
            return Err(ConfigError::WorkerTimeoutExceedsRun(
                config.limits.worker_timeout_secs,
                config.limits.run_timeout_secs,
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                config.breaker.failure_threshold,
            ));
        }
        if config.breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                config.breaker.success_threshold,
            ));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }
        if config.retry.base_delay_ms > config.retry.max_delay_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.base_delay_ms,
                config.retry.max_delay_ms,
            ));
        }
        if !(0.0..=1.0).contains(&config.retry.jitter) {
            return Err(ConfigError::InvalidJitter(config.retry.jitter));
        }
        if config.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(config.retry.multiplier));
        }

        if config.consensus.session_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(
                config.consensus.session_timeout_secs,
            ));
        }
        if config.blackboard.query_limit == 0 {
            return Err(ConfigError::InvalidQueryLimit(config.blackboard.query_limit));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::blackboard::MigrationMode;

    #[test]
    fn default_config_is_valid() {
        let config = SwarmConfig::default();
        assert_eq!(config.limits.llm_concurrency, 5);
        assert_eq!(config.limits.scrape_concurrency, 3);
        assert_eq!(config.limits.run_timeout_secs, 180);
        assert_eq!(config.database.path, ".waggle/waggle.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.blackboard.mode, MigrationMode::WriteOld);
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn yaml_parsing() {
        let yaml = r"
limits:
  llm_concurrency: 8
  worker_timeout_secs: 45
  worker_timeout_overrides:
    crawler: 120
database:
  path: /custom/path.db
  max_connections: 3
logging:
  level: debug
  format: pretty
blackboard:
  mode: dual_write_read_old
";

        let config: SwarmConfig = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.limits.llm_concurrency, 8);
        assert_eq!(config.limits.worker_timeout_secs, 45);
        assert_eq!(
            config.limits.worker_timeout_overrides.get("crawler"),
            Some(&120)
        );
        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 3);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.blackboard.mode, MigrationMode::DualWriteReadOld);

        ConfigLoader::validate(&config).expect("parsed config should be valid");
    }

    #[test]
    fn limits_convert_to_run_limits() {
        let mut config = SwarmConfig::default();
        config
            .limits
            .worker_timeout_overrides
            .insert("slow".to_string(), 150);

        let limits = config.limits.to_limits();
        assert_eq!(limits.llm_concurrency, 5);
        assert_eq!(limits.worker_timeout_for("slow").as_secs(), 150);
        assert_eq!(limits.worker_timeout_for("other").as_secs(), 90);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = SwarmConfig::default();
        config.limits.llm_concurrency = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency(0))
        ));
    }

    #[test]
    fn worker_timeout_must_fit_in_run_timeout() {
        let mut config = SwarmConfig::default();
        config.limits.worker_timeout_secs = 300;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::WorkerTimeoutExceedsRun(300, 180))
        ));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = SwarmConfig::default();
        config.logging.level = "verbose".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "verbose"),
            other => panic!("expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn invalid_log_format_is_rejected() {
        let mut config = SwarmConfig::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn empty_database_path_is_rejected() {
        let mut config = SwarmConfig::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let mut config = SwarmConfig::default();
        config.retry.base_delay_ms = 30_000;
        config.retry.max_delay_ms = 10_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(30_000, 10_000))
        ));
    }

    #[test]
    fn out_of_range_jitter_is_rejected() {
        let mut config = SwarmConfig::default();
        config.retry.jitter = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidJitter(_))
        ));
    }

    #[test]
    fn hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "limits:\n  llm_concurrency: 4\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(
            override_file,
            "limits:\n  llm_concurrency: 12\nlogging:\n  level: debug"
        )
        .unwrap();
        override_file.flush().unwrap();

        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.limits.llm_concurrency, 12, "override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.format, "json",
            "base value should persist when not overridden"
        );
    }
}
