//! SQLite-backed task store implementation.
//!
//! SQLite has no row-level `FOR UPDATE`; a write transaction locks the whole
//! database, which gives the same exclusion guarantee for a single shared
//! file. Claim sweeps are single `UPDATE ... RETURNING` statements and are
//! therefore atomic on this backend as well.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::MonitorError;
use crate::migrations;

use super::{ClaimedTask, NewTask, TaskRecord, TaskStatus, TaskStore};

/// SQLite-backed task store.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Create a new SQLite task store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite task store from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Connects to the database with sensible defaults
    /// - Runs all migrations
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| MonitorError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let path_str = path.to_string_lossy();
        let url = format!("sqlite:{}?mode=rwc", path_str);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| MonitorError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        migrations::SQLITE
            .run(&pool)
            .await
            .map_err(|e| MonitorError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

const TASK_COLUMNS: &str = "id, task_id, service_name, job_id, monitor_url, \
     status, success_conditions, failure_conditions, \
     check_interval, timeout_at, assigned_instance, last_heartbeat, \
     retry_count, max_retries, result, created_at, completed_at";

struct SqliteClaimedTask {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
    task: TaskRecord,
}

#[async_trait]
impl ClaimedTask for SqliteClaimedTask {
    fn task(&self) -> &TaskRecord {
        &self.task
    }

    async fn heartbeat(mut self: Box<Self>, now: DateTime<Utc>) -> Result<(), MonitorError> {
        sqlx::query("UPDATE monitor_tasks SET last_heartbeat = ?2 WHERE id = ?1")
            .bind(self.task.id)
            .bind(now)
            .execute(&mut *self.tx)
            .await?;

        self.tx.commit().await?;
        Ok(())
    }

    async fn complete(
        mut self: Box<Self>,
        status: TaskStatus,
        result: &str,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        sqlx::query(
            r#"
            UPDATE monitor_tasks
            SET status = ?2, completed_at = ?3, result = ?4
            WHERE id = ?1
            "#,
        )
        .bind(self.task.id)
        .bind(status.as_str())
        .bind(now)
        .bind(result)
        .execute(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, task: &NewTask) -> Result<TaskRecord, MonitorError> {
        let sql = format!(
            r#"
            INSERT INTO monitor_tasks
                (task_id, service_name, job_id, monitor_url, status,
                 success_conditions, failure_conditions, check_interval, timeout_at,
                 assigned_instance, last_heartbeat, max_retries, created_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?10)
            RETURNING {TASK_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(&task.task_id)
            .bind(&task.service_name)
            .bind(&task.job_id)
            .bind(&task.monitor_url)
            .bind(&task.success_conditions)
            .bind(&task.failure_conditions)
            .bind(task.check_interval)
            .bind(task.timeout_at)
            .bind(&task.assigned_instance)
            .bind(task.created_at)
            .bind(task.max_retries)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    MonitorError::DuplicateActiveTask {
                        service_name: task.service_name.clone(),
                        job_id: task.job_id.clone(),
                    }
                }
                _ => e.into(),
            })?;

        Ok(record)
    }

    async fn find_active(
        &self,
        service_name: &str,
        job_id: &str,
    ) -> Result<Option<TaskRecord>, MonitorError> {
        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM monitor_tasks
            WHERE service_name = ?1 AND job_id = ?2
              AND status IN ('pending', 'running')
            LIMIT 1
            "#
        );

        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(service_name)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, MonitorError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM monitor_tasks WHERE task_id = ?1");

        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, MonitorError> {
        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM monitor_tasks
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at DESC
            LIMIT ?2
            "#
        );

        let records = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn mark_running(&self, task_id: &str) -> Result<(), MonitorError> {
        sqlx::query(
            r#"
            UPDATE monitor_tasks
            SET status = 'running'
            WHERE task_id = ?1 AND status = 'pending'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_for_check(
        &self,
        task_id: &str,
        instance_id: &str,
    ) -> Result<Option<Box<dyn ClaimedTask>>, MonitorError> {
        let mut tx = self.pool.begin().await?;

        // The no-op write acquires the database write lock up front, standing
        // in for SELECT ... FOR UPDATE; the predicate doubles as the lease check.
        let res = sqlx::query(
            r#"
            UPDATE monitor_tasks
            SET last_heartbeat = last_heartbeat
            WHERE task_id = ?1 AND assigned_instance = ?2 AND status = 'running'
            "#,
        )
        .bind(task_id)
        .bind(instance_id)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(None);
        }

        let sql = format!("SELECT {TASK_COLUMNS} FROM monitor_tasks WHERE task_id = ?1");
        let task = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?;

        Ok(Some(Box::new(SqliteClaimedTask { tx, task })))
    }

    async fn claim_orphans(
        &self,
        instance_id: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, MonitorError> {
        // Rows at the retry bound are failed in the same statement so the
        // increment and the terminal write can never be torn apart
        let sql = format!(
            r#"
            UPDATE monitor_tasks
            SET assigned_instance = ?1,
                last_heartbeat = ?3,
                retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 > max_retries
                              THEN 'failed' ELSE status END,
                completed_at = CASE WHEN retry_count + 1 > max_retries
                                    THEN ?3 ELSE completed_at END,
                result = CASE WHEN retry_count + 1 > max_retries
                              THEN ?5 ELSE result END
            WHERE id IN (
                SELECT id FROM monitor_tasks
                WHERE status = 'running'
                  AND assigned_instance IS NOT ?1
                  AND last_heartbeat < ?2
                  AND timeout_at > ?3
                ORDER BY last_heartbeat ASC
                LIMIT ?4
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        let records = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(instance_id)
            .bind(stale_before)
            .bind(now)
            .bind(limit)
            .bind(super::RETRY_EXHAUSTED_RESULT)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn claim_startup(
        &self,
        instance_id: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, MonitorError> {
        let sql = format!(
            r#"
            UPDATE monitor_tasks
            SET assigned_instance = ?1,
                status = 'running',
                last_heartbeat = ?3
            WHERE status IN ('pending', 'running')
              AND timeout_at > ?3
              AND (assigned_instance = ?1
                   OR (status = 'running' AND last_heartbeat < ?2)
                   OR (status = 'pending' AND assigned_instance IS NULL))
            RETURNING {TASK_COLUMNS}
            "#
        );

        let records = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(instance_id)
            .bind(stale_before)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>, MonitorError> {
        let sql = format!(
            r#"
            UPDATE monitor_tasks
            SET status = 'timeout',
                completed_at = ?1,
                result = ?2
            WHERE status IN ('pending', 'running')
              AND timeout_at <= ?1
            RETURNING {TASK_COLUMNS}
            "#
        );

        let records = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(now)
            .bind(super::TIMEOUT_RESULT)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn complete_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, MonitorError> {
        let res = sqlx::query(
            r#"
            UPDATE monitor_tasks
            SET status = ?2, completed_at = ?3, result = ?4
            WHERE task_id = ?1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(now)
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn health_check(&self) -> Result<bool, MonitorError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
