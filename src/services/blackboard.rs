//! Shared blackboard: versioned, categorized key/value state for one run.
//!
//! All writes go through `BlackboardBackend::write`, which assigns the next
//! version for the key under the store lock. There is no read-modify-write
//! cycle anywhere, so concurrent writers cannot lose updates; versions for a
//! key are dense (1, 2, 3, ...) even across expiry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::domain::errors::SwarmResult;
use crate::domain::models::blackboard::{BlackboardEntry, BlackboardStats, DataCategory};
use crate::domain::ports::BlackboardBackend;
use crate::services::swarm_events::{SwarmEventBus, SwarmEventData};

const ALL_CATEGORIES: [DataCategory; 5] = [
    DataCategory::CompanyData,
    DataCategory::Evidence,
    DataCategory::Scores,
    DataCategory::Insights,
    DataCategory::Coordination,
];

const CHANGE_CHANNEL_CAPACITY: usize = 256;

struct MemoryState {
    entries: HashMap<String, BlackboardEntry>,
    /// Version counters survive entry expiry so versions never restart.
    versions: HashMap<String, u64>,
    stats: BlackboardStats,
}

/// In-process blackboard backend.
pub struct MemoryBlackboard {
    state: RwLock<MemoryState>,
    channels: HashMap<DataCategory, broadcast::Sender<BlackboardEntry>>,
}

impl MemoryBlackboard {
    pub fn new() -> Self {
        let channels = ALL_CATEGORIES
            .iter()
            .map(|c| (*c, broadcast::channel(CHANGE_CHANNEL_CAPACITY).0))
            .collect();
        Self {
            state: RwLock::new(MemoryState {
                entries: HashMap::new(),
                versions: HashMap::new(),
                stats: BlackboardStats::default(),
            }),
            channels,
        }
    }

    /// Returns whether any subscriber received the change.
    fn notify(&self, entry: &BlackboardEntry) -> bool {
        self.channels
            .get(&entry.category)
            .is_some_and(|sender| sender.send(entry.clone()).is_ok())
    }
}

impl Default for MemoryBlackboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlackboardBackend for MemoryBlackboard {
    async fn write(
        &self,
        key: &str,
        category: DataCategory,
        value: serde_json::Value,
        source: &str,
        ttl: Option<Duration>,
    ) -> SwarmResult<BlackboardEntry> {
        let entry = {
            let mut state = self.state.write().await;
            let version = state
                .versions
                .entry(key.to_string())
                .and_modify(|v| *v += 1)
                .or_insert(1);
            let entry = BlackboardEntry {
                key: key.to_string(),
                category,
                value,
                source: source.to_string(),
                written_at: Utc::now(),
                version: *version,
                expires_at: ttl.map(|t| Utc::now() + t),
            };
            state.entries.insert(key.to_string(), entry.clone());
            state.stats.writes += 1;
            entry
        };

        if self.notify(&entry) {
            self.state.write().await.stats.notifications += 1;
        }
        Ok(entry)
    }

    async fn write_at(&self, entry: BlackboardEntry) -> SwarmResult<()> {
        let mut state = self.state.write().await;
        let counter = state.versions.entry(entry.key.clone()).or_insert(0);
        if entry.version > *counter {
            *counter = entry.version;
        }
        state.entries.insert(entry.key.clone(), entry.clone());
        state.stats.writes += 1;
        drop(state);
        if self.notify(&entry) {
            self.state.write().await.stats.notifications += 1;
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> SwarmResult<Option<BlackboardEntry>> {
        let mut state = self.state.write().await;
        state.stats.reads += 1;
        match state.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                state.entries.remove(key);
                state.stats.expired_removed += 1;
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    async fn query(
        &self,
        category: DataCategory,
        limit: usize,
    ) -> SwarmResult<Vec<BlackboardEntry>> {
        let mut state = self.state.write().await;
        state.stats.reads += 1;

        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|e| e.is_expired())
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            state.entries.remove(key);
            state.stats.expired_removed += 1;
        }

        let mut matches: Vec<BlackboardEntry> = state
            .entries
            .values()
            .filter(|e| e.category == category)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.written_at.cmp(&a.written_at));
        matches.truncate(limit);
        Ok(matches)
    }

    fn subscribe(&self, category: DataCategory) -> broadcast::Receiver<BlackboardEntry> {
        // Channels for every category exist from construction.
        self.channels[&category].subscribe()
    }

    async fn cleanup_expired(&self) -> SwarmResult<u64> {
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|e| e.is_expired())
            .map(|e| e.key.clone())
            .collect();
        let swept = expired.len() as u64;
        for key in &expired {
            state.entries.remove(key);
        }
        state.stats.expired_removed += swept;
        if swept > 0 {
            debug!(swept, "expired blackboard entries removed");
        }
        Ok(swept)
    }

    async fn stats(&self) -> BlackboardStats {
        self.state.read().await.stats
    }
}

/// Per-run blackboard facade.
///
/// Wraps the configured backend (memory, durable, or migrating hybrid),
/// applies per-category default TTLs, and emits `blackboard_update`
/// observer events.
pub struct Blackboard {
    backend: Arc<dyn BlackboardBackend>,
    events: SwarmEventBus,
    default_ttl: HashMap<DataCategory, Duration>,
    query_limit: usize,
}

impl Blackboard {
    pub fn new(backend: Arc<dyn BlackboardBackend>, events: SwarmEventBus) -> Self {
        Self {
            backend,
            events,
            default_ttl: HashMap::new(),
            query_limit: 100,
        }
    }

    pub fn with_default_ttl(mut self, category: DataCategory, ttl: Duration) -> Self {
        self.default_ttl.insert(category, ttl);
        self
    }

    pub fn with_query_limit(mut self, limit: usize) -> Self {
        self.query_limit = limit;
        self
    }

    /// Write a value, returning the entry with its assigned version.
    pub async fn write(
        &self,
        key: &str,
        category: DataCategory,
        value: serde_json::Value,
        source: &str,
    ) -> SwarmResult<BlackboardEntry> {
        let ttl = self.default_ttl.get(&category).copied();
        self.write_with_ttl(key, category, value, source, ttl).await
    }

    pub async fn write_with_ttl(
        &self,
        key: &str,
        category: DataCategory,
        value: serde_json::Value,
        source: &str,
        ttl: Option<Duration>,
    ) -> SwarmResult<BlackboardEntry> {
        let entry = self.backend.write(key, category, value, source, ttl).await?;

        self.events.emit(SwarmEventData::BlackboardUpdate {
            key: key.to_string(),
            category,
            source: source.to_string(),
        });
        debug!(key, category = %category, source, version = entry.version, "blackboard write");
        Ok(entry)
    }

    pub async fn read(&self, key: &str) -> SwarmResult<Option<BlackboardEntry>> {
        self.backend.read(key).await
    }

    pub async fn query(&self, category: DataCategory) -> SwarmResult<Vec<BlackboardEntry>> {
        self.backend.query(category, self.query_limit).await
    }

    pub fn subscribe(&self, category: DataCategory) -> broadcast::Receiver<BlackboardEntry> {
        self.backend.subscribe(category)
    }

    pub async fn cleanup_expired(&self) -> SwarmResult<u64> {
        self.backend.cleanup_expired().await
    }

    pub async fn stats(&self) -> BlackboardStats {
        self.backend.stats().await
    }
}
