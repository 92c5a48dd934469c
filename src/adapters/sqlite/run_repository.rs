//! Durable run store on SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::memory::cancel_marker_ttl;
use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::models::run::{RunFilter, RunMeta, RunRecord, RunStatus, TraceEvent};
use crate::domain::ports::RunStore;

#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    user_id: Option<String>,
    target: String,
    status: String,
    result: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = SwarmError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let run_id = Uuid::parse_str(&row.id)
            .map_err(|e| SwarmError::Database(format!("bad run id: {e}")))?;
        let status = RunStatus::parse(&row.status)
            .ok_or_else(|| SwarmError::Database(format!("unknown status '{}'", row.status)))?;
        let result = row
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(RunRecord {
            meta: RunMeta {
                run_id,
                user_id: row.user_id,
                target: row.target,
                created_at: parse_timestamp(&row.created_at)?,
                completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
            },
            status,
            result,
            trace: Vec::new(),
        })
    }
}

fn parse_timestamp(s: &str) -> SwarmResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SwarmError::Database(format!("bad timestamp '{s}': {e}")))
}

#[derive(sqlx::FromRow)]
struct TraceRow {
    event_type: String,
    worker_id: Option<String>,
    timestamp: String,
    data: String,
}

impl TryFrom<TraceRow> for TraceEvent {
    type Error = SwarmError;

    fn try_from(row: TraceRow) -> Result<Self, Self::Error> {
        Ok(TraceEvent {
            event_type: row.event_type,
            worker_id: row.worker_id,
            timestamp: parse_timestamp(&row.timestamp)?,
            data: serde_json::from_str(&row.data)?,
        })
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, meta: &RunMeta) -> SwarmResult<()> {
        sqlx::query(
            r#"INSERT INTO runs (id, user_id, target, status, created_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(meta.run_id.to_string())
        .bind(&meta.user_id)
        .bind(&meta.target)
        .bind(RunStatus::Pending.as_str())
        .bind(meta.created_at.to_rfc3339())
        .bind(meta.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> SwarmResult<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some((current,)) = current else {
            return Err(SwarmError::RunNotFound(run_id));
        };
        let from = RunStatus::parse(&current)
            .ok_or_else(|| SwarmError::Database(format!("unknown status '{current}'")))?;

        if !from.can_transition(status) {
            return Err(SwarmError::InvalidStateTransition { from, to: status });
        }

        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
        sqlx::query(
            r#"UPDATE runs SET status = ?, completed_at = COALESCE(completed_at, ?)
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(completed_at)
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_result(&self, run_id: Uuid, result: &serde_json::Value) -> SwarmResult<()> {
        let updated = sqlx::query("UPDATE runs SET result = ? WHERE id = ?")
            .bind(serde_json::to_string(result)?)
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(SwarmError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> SwarmResult<Option<RunRecord>> {
        let row: Option<RunRow> = sqlx::query_as(
            "SELECT id, user_id, target, status, result, created_at, completed_at
             FROM runs WHERE id = ?",
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut record: RunRecord = row.try_into()?;
                record.trace = self.get_trace(run_id).await?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Listing omits traces; fetch a single run for the full record.
    async fn list_runs(&self, filter: &RunFilter) -> SwarmResult<Vec<RunRecord>> {
        let mut query = String::from(
            "SELECT id, user_id, target, status, result, created_at, completed_at
             FROM runs WHERE 1=1",
        );
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(user_id) = &filter.user_id {
            query.push_str(" AND user_id = ?");
            bindings.push(user_id.clone());
        }
        query.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let limit = if filter.limit == 0 { i64::MAX } else { filter.limit as i64 };
        let mut q = sqlx::query_as::<_, RunRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        q = q.bind(limit).bind(filter.offset as i64);

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn request_cancel(&self, run_id: Uuid, reason: &str) -> SwarmResult<()> {
        let expires = (Utc::now() + cancel_marker_ttl()).to_rfc3339();
        let updated = sqlx::query(
            r#"UPDATE runs SET
                 cancel_reason = COALESCE(cancel_reason, ?),
                 cancel_expires_at = COALESCE(cancel_expires_at, ?)
               WHERE id = ?"#,
        )
        .bind(reason)
        .bind(expires)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(SwarmError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn cancel_requested(&self, run_id: Uuid) -> SwarmResult<Option<String>> {
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT cancel_reason, cancel_expires_at FROM runs WHERE id = ?")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        let Some((reason, expires)) = row else {
            return Err(SwarmError::RunNotFound(run_id));
        };

        match (reason, expires) {
            (Some(reason), Some(expires)) if parse_timestamp(&expires)? > Utc::now() => {
                Ok(Some(reason))
            }
            _ => Ok(None),
        }
    }

    async fn append_trace(&self, run_id: Uuid, event: &TraceEvent) -> SwarmResult<()> {
        sqlx::query(
            r#"INSERT INTO run_trace (run_id, event_type, worker_id, timestamp, data)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(run_id.to_string())
        .bind(&event.event_type)
        .bind(&event.worker_id)
        .bind(event.timestamp.to_rfc3339())
        .bind(serde_json::to_string(&event.data)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_trace(&self, run_id: Uuid) -> SwarmResult<Vec<TraceEvent>> {
        let rows: Vec<TraceRow> = sqlx::query_as(
            "SELECT event_type, worker_id, timestamp, data
             FROM run_trace WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;

    async fn store() -> SqliteRunStore {
        SqliteRunStore::new(create_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let store = store().await;
        let meta = RunMeta::new("https://example.com", Some("u1".to_string()));
        store.create_run(&meta).await.unwrap();

        let record = store.get_run(meta.run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Pending);
        assert_eq!(record.meta.target, "https://example.com");
        assert_eq!(record.meta.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn status_transitions_are_enforced() {
        let store = store().await;
        let meta = RunMeta::new("t", None);
        store.create_run(&meta).await.unwrap();

        store.set_status(meta.run_id, RunStatus::Running).await.unwrap();
        store.set_status(meta.run_id, RunStatus::Cancelled).await.unwrap();

        let err = store
            .set_status(meta.run_id, RunStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::InvalidStateTransition { .. }));

        let record = store.get_run(meta.run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Cancelled);
        assert!(record.meta.completed_at.is_some());
    }

    #[tokio::test]
    async fn result_and_trace_round_trip() {
        let store = store().await;
        let meta = RunMeta::new("t", None);
        store.create_run(&meta).await.unwrap();

        store
            .set_result(meta.run_id, &serde_json::json!({"score": 82}))
            .await
            .unwrap();
        store
            .append_trace(
                meta.run_id,
                &TraceEvent::new("run_started").with_data(serde_json::json!({"phases": 3})),
            )
            .await
            .unwrap();
        store
            .append_trace(meta.run_id, &TraceEvent::new("run_completed"))
            .await
            .unwrap();

        let record = store.get_run(meta.run_id).await.unwrap().unwrap();
        assert_eq!(record.result, Some(serde_json::json!({"score": 82})));
        assert_eq!(record.trace.len(), 2);
        assert_eq!(record.trace[0].event_type, "run_started");
        assert_eq!(record.trace[1].event_type, "run_completed");
    }

    #[tokio::test]
    async fn list_runs_filters_and_pages() {
        let store = store().await;
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut meta = RunMeta::new(format!("t{i}"), None);
            meta.created_at = Utc::now() + chrono::Duration::seconds(i);
            ids.push(meta.run_id);
            store.create_run(&meta).await.unwrap();
        }
        store.set_status(ids[1], RunStatus::Running).await.unwrap();

        let all = store.list_runs(&RunFilter::latest(2)).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].meta.run_id, ids[2]);

        let running = store
            .list_runs(&RunFilter::latest(10).with_status(RunStatus::Running))
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].meta.run_id, ids[1]);
    }

    #[tokio::test]
    async fn cancel_marker_is_idempotent() {
        let store = store().await;
        let meta = RunMeta::new("t", None);
        store.create_run(&meta).await.unwrap();

        assert!(store.cancel_requested(meta.run_id).await.unwrap().is_none());

        store.request_cancel(meta.run_id, "first").await.unwrap();
        store.request_cancel(meta.run_id, "second").await.unwrap();
        assert_eq!(
            store.cancel_requested(meta.run_id).await.unwrap().as_deref(),
            Some("first")
        );
    }
}
