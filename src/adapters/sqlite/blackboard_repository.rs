//! Durable blackboard backend on SQLite.
//!
//! Version assignment happens inside a transaction against the
//! `blackboard_versions` table, so concurrent writers to one key get dense,
//! strictly increasing versions. Change notification is in-process via
//! broadcast channels, matching the memory backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::models::blackboard::{BlackboardEntry, BlackboardStats, DataCategory};
use crate::domain::ports::BlackboardBackend;

const ALL_CATEGORIES: [DataCategory; 5] = [
    DataCategory::CompanyData,
    DataCategory::Evidence,
    DataCategory::Scores,
    DataCategory::Insights,
    DataCategory::Coordination,
];

const CHANGE_CHANNEL_CAPACITY: usize = 256;

pub struct SqliteBlackboard {
    pool: SqlitePool,
    channels: HashMap<DataCategory, broadcast::Sender<BlackboardEntry>>,
    writes: AtomicU64,
    reads: AtomicU64,
    notifications: AtomicU64,
    expired_removed: AtomicU64,
}

impl SqliteBlackboard {
    pub fn new(pool: SqlitePool) -> Self {
        let channels = ALL_CATEGORIES
            .iter()
            .map(|c| (*c, broadcast::channel(CHANGE_CHANNEL_CAPACITY).0))
            .collect();
        Self {
            pool,
            channels,
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            expired_removed: AtomicU64::new(0),
        }
    }

    fn notify(&self, entry: &BlackboardEntry) {
        if let Some(sender) = self.channels.get(&entry.category) {
            // Err means no live subscriber received the change.
            if sender.send(entry.clone()).is_ok() {
                self.notifications.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    key: String,
    category: String,
    value: String,
    source: String,
    written_at: String,
    version: i64,
    expires_at: Option<String>,
}

impl TryFrom<EntryRow> for BlackboardEntry {
    type Error = SwarmError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let category = DataCategory::parse(&row.category)
            .ok_or_else(|| SwarmError::Database(format!("unknown category '{}'", row.category)))?;
        Ok(BlackboardEntry {
            key: row.key,
            category,
            value: serde_json::from_str(&row.value)?,
            source: row.source,
            written_at: parse_timestamp(&row.written_at)?,
            version: row.version as u64,
            expires_at: row.expires_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(s: &str) -> SwarmResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SwarmError::Database(format!("bad timestamp '{s}': {e}")))
}

#[async_trait]
impl BlackboardBackend for SqliteBlackboard {
    async fn write(
        &self,
        key: &str,
        category: DataCategory,
        value: serde_json::Value,
        source: &str,
        ttl: Option<Duration>,
    ) -> SwarmResult<BlackboardEntry> {
        let mut tx = self.pool.begin().await?;

        let (version,): (i64,) = sqlx::query_as(
            r#"INSERT INTO blackboard_versions (key, version) VALUES (?, 1)
               ON CONFLICT(key) DO UPDATE SET version = version + 1
               RETURNING version"#,
        )
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;

        let entry = BlackboardEntry {
            key: key.to_string(),
            category,
            value,
            source: source.to_string(),
            written_at: Utc::now(),
            version: version as u64,
            expires_at: ttl.map(|t| Utc::now() + t),
        };

        sqlx::query(
            r#"INSERT INTO blackboard_entries
                 (key, category, value, source, written_at, version, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET
                 category = excluded.category,
                 value = excluded.value,
                 source = excluded.source,
                 written_at = excluded.written_at,
                 version = excluded.version,
                 expires_at = excluded.expires_at"#,
        )
        .bind(&entry.key)
        .bind(entry.category.as_str())
        .bind(serde_json::to_string(&entry.value)?)
        .bind(&entry.source)
        .bind(entry.written_at.to_rfc3339())
        .bind(entry.version as i64)
        .bind(entry.expires_at.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.notify(&entry);
        Ok(entry)
    }

    async fn write_at(&self, entry: BlackboardEntry) -> SwarmResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO blackboard_versions (key, version) VALUES (?, ?)
               ON CONFLICT(key) DO UPDATE SET version = MAX(version, excluded.version)"#,
        )
        .bind(&entry.key)
        .bind(entry.version as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO blackboard_entries
                 (key, category, value, source, written_at, version, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET
                 category = excluded.category,
                 value = excluded.value,
                 source = excluded.source,
                 written_at = excluded.written_at,
                 version = excluded.version,
                 expires_at = excluded.expires_at"#,
        )
        .bind(&entry.key)
        .bind(entry.category.as_str())
        .bind(serde_json::to_string(&entry.value)?)
        .bind(&entry.source)
        .bind(entry.written_at.to_rfc3339())
        .bind(entry.version as i64)
        .bind(entry.expires_at.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.notify(&entry);
        Ok(())
    }

    async fn read(&self, key: &str) -> SwarmResult<Option<BlackboardEntry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now().to_rfc3339();

        let row: Option<EntryRow> = sqlx::query_as(
            r#"SELECT key, category, value, source, written_at, version, expires_at
               FROM blackboard_entries
               WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)"#,
        )
        .bind(key)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn query(
        &self,
        category: DataCategory,
        limit: usize,
    ) -> SwarmResult<Vec<BlackboardEntry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now().to_rfc3339();

        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"SELECT key, category, value, source, written_at, version, expires_at
               FROM blackboard_entries
               WHERE category = ? AND (expires_at IS NULL OR expires_at > ?)
               ORDER BY written_at DESC
               LIMIT ?"#,
        )
        .bind(category.as_str())
        .bind(&now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    fn subscribe(&self, category: DataCategory) -> broadcast::Receiver<BlackboardEntry> {
        self.channels[&category].subscribe()
    }

    async fn cleanup_expired(&self) -> SwarmResult<u64> {
        let now = Utc::now().to_rfc3339();
        let deleted = sqlx::query(
            "DELETE FROM blackboard_entries WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let swept = deleted.rows_affected();
        self.expired_removed.fetch_add(swept, Ordering::Relaxed);
        Ok(swept)
    }

    async fn stats(&self) -> BlackboardStats {
        BlackboardStats {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            expired_removed: self.expired_removed.load(Ordering::Relaxed),
        }
    }
}
