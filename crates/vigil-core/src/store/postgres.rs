// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed task store.
//!
//! Claim operations use `SELECT ... FOR UPDATE` (per-task check cycles) and
//! `FOR UPDATE SKIP LOCKED` (orphan sweeps) so that competing instances
//! serialize on the row instead of on anything in-process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::MonitorError;

use super::{ClaimedTask, NewTask, TaskRecord, TaskStatus, TaskStore};

/// PostgreSQL-backed task store implementation.
#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Create a new Postgres-backed task store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row Operations
// ============================================================================

/// Insert a new task row in `pending`.
pub async fn create_task(pool: &PgPool, task: &NewTask) -> Result<TaskRecord, MonitorError> {
    let record = sqlx::query_as::<_, TaskRecord>(
        r#"
        INSERT INTO monitor_tasks
            (task_id, service_name, job_id, monitor_url, status,
             success_conditions, failure_conditions, check_interval, timeout_at,
             assigned_instance, last_heartbeat, max_retries, created_at)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10, $11, $10)
        RETURNING id, task_id, service_name, job_id, monitor_url,
                  status::text AS status, success_conditions, failure_conditions,
                  check_interval, timeout_at, assigned_instance, last_heartbeat,
                  retry_count, max_retries, result, created_at, completed_at
        "#,
    )
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
    .fetch_one(pool)
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

/// Find the active task for a (service_name, job_id) pair.
pub async fn find_active(
    pool: &PgPool,
    service_name: &str,
    job_id: &str,
) -> Result<Option<TaskRecord>, MonitorError> {
    let record = sqlx::query_as::<_, TaskRecord>(
        r#"
        SELECT id, task_id, service_name, job_id, monitor_url,
               status::text AS status, success_conditions, failure_conditions,
               check_interval, timeout_at, assigned_instance, last_heartbeat,
               retry_count, max_retries, result, created_at, completed_at
        FROM monitor_tasks
        WHERE service_name = $1 AND job_id = $2
          AND status IN ('pending', 'running')
        LIMIT 1
        "#,
    )
    .bind(service_name)
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Get a task by its public identifier.
pub async fn get_task(pool: &PgPool, task_id: &str) -> Result<Option<TaskRecord>, MonitorError> {
    let record = sqlx::query_as::<_, TaskRecord>(
        r#"
        SELECT id, task_id, service_name, job_id, monitor_url,
               status::text AS status, success_conditions, failure_conditions,
               check_interval, timeout_at, assigned_instance, last_heartbeat,
               retry_count, max_retries, result, created_at, completed_at
        FROM monitor_tasks
        WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// List tasks, newest first, optionally filtered by status.
pub async fn list_tasks(
    pool: &PgPool,
    status: Option<TaskStatus>,
    limit: i64,
) -> Result<Vec<TaskRecord>, MonitorError> {
    let records = sqlx::query_as::<_, TaskRecord>(
        r#"
        SELECT id, task_id, service_name, job_id, monitor_url,
               status::text AS status, success_conditions, failure_conditions,
               check_interval, timeout_at, assigned_instance, last_heartbeat,
               retry_count, max_retries, result, created_at, completed_at
        FROM monitor_tasks
        WHERE ($1::TEXT IS NULL OR status::text = $1)
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Transition a `pending` task to `running`.
pub async fn mark_running(pool: &PgPool, task_id: &str) -> Result<(), MonitorError> {
    sqlx::query(
        r#"
        UPDATE monitor_tasks
        SET status = 'running'
        WHERE task_id = $1 AND status = 'pending'
        "#,
    )
    .bind(task_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Atomically re-own orphaned tasks for `instance_id`, failing any row whose
/// incremented retry count passes its bound.
pub async fn claim_orphans(
    pool: &PgPool,
    instance_id: &str,
    stale_before: DateTime<Utc>,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<TaskRecord>, MonitorError> {
    let records = sqlx::query_as::<_, TaskRecord>(
        r#"
        WITH candidates AS (
            SELECT id FROM monitor_tasks
            WHERE status = 'running'
              AND assigned_instance IS DISTINCT FROM $1
              AND last_heartbeat < $2
              AND timeout_at > $3
            ORDER BY last_heartbeat ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
        )
        UPDATE monitor_tasks t
        SET assigned_instance = $1,
            last_heartbeat = $3,
            retry_count = t.retry_count + 1,
            status = CASE WHEN t.retry_count + 1 > t.max_retries
                          THEN 'failed'::monitor_task_status ELSE t.status END,
            completed_at = CASE WHEN t.retry_count + 1 > t.max_retries
                                THEN $3 ELSE t.completed_at END,
            result = CASE WHEN t.retry_count + 1 > t.max_retries
                          THEN $5 ELSE t.result END
        FROM candidates c
        WHERE t.id = c.id
        RETURNING t.id, t.task_id, t.service_name, t.job_id, t.monitor_url,
                  t.status::text AS status, t.success_conditions, t.failure_conditions,
                  t.check_interval, t.timeout_at, t.assigned_instance, t.last_heartbeat,
                  t.retry_count, t.max_retries, t.result, t.created_at, t.completed_at
        "#,
    )
    .bind(instance_id)
    .bind(stale_before)
    .bind(now)
    .bind(limit)
    .bind(super::RETRY_EXHAUSTED_RESULT)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// One-time startup recovery claim.
pub async fn claim_startup(
    pool: &PgPool,
    instance_id: &str,
    stale_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<TaskRecord>, MonitorError> {
    let records = sqlx::query_as::<_, TaskRecord>(
        r#"
        UPDATE monitor_tasks
        SET assigned_instance = $1,
            status = 'running',
            last_heartbeat = $3
        WHERE status IN ('pending', 'running')
          AND timeout_at > $3
          AND (assigned_instance = $1
               OR (status = 'running' AND last_heartbeat < $2)
               OR (status = 'pending' AND assigned_instance IS NULL))
        RETURNING id, task_id, service_name, job_id, monitor_url,
                  status::text AS status, success_conditions, failure_conditions,
                  check_interval, timeout_at, assigned_instance, last_heartbeat,
                  retry_count, max_retries, result, created_at, completed_at
        "#,
    )
    .bind(instance_id)
    .bind(stale_before)
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Force-terminate every active task whose deadline has passed.
pub async fn expire_overdue(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<TaskRecord>, MonitorError> {
    let records = sqlx::query_as::<_, TaskRecord>(
        r#"
        UPDATE monitor_tasks
        SET status = 'timeout',
            completed_at = $1,
            result = $2
        WHERE status IN ('pending', 'running')
          AND timeout_at <= $1
        RETURNING id, task_id, service_name, job_id, monitor_url,
                  status::text AS status, success_conditions, failure_conditions,
                  check_interval, timeout_at, assigned_instance, last_heartbeat,
                  retry_count, max_retries, result, created_at, completed_at
        "#,
    )
    .bind(now)
    .bind(super::TIMEOUT_RESULT)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Terminal write guarded against already-terminal rows.
pub async fn complete_task(
    pool: &PgPool,
    task_id: &str,
    status: TaskStatus,
    result: &str,
    now: DateTime<Utc>,
) -> Result<bool, MonitorError> {
    let res = sqlx::query(
        r#"
        UPDATE monitor_tasks
        SET status = $2::monitor_task_status,
            completed_at = $3,
            result = $4
        WHERE task_id = $1 AND status IN ('pending', 'running')
        "#,
    )
    .bind(task_id)
    .bind(status.as_str())
    .bind(now)
    .bind(result)
    .execute(pool)
    .await?;

    Ok(res.rows_affected() > 0)
}

// ============================================================================
// Check-cycle claim (row lock held across the probe)
// ============================================================================

struct PgClaimedTask {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
    task: TaskRecord,
}

#[async_trait]
impl ClaimedTask for PgClaimedTask {
    fn task(&self) -> &TaskRecord {
        &self.task
    }

    async fn heartbeat(mut self: Box<Self>, now: DateTime<Utc>) -> Result<(), MonitorError> {
        sqlx::query(
            r#"
            UPDATE monitor_tasks
            SET last_heartbeat = $2
            WHERE id = $1
            "#,
        )
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
            SET status = $2::monitor_task_status,
                completed_at = $3,
                result = $4
            WHERE id = $1
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

/// Row-lock the task for one check cycle if this instance still owns it.
pub async fn claim_for_check(
    pool: &PgPool,
    task_id: &str,
    instance_id: &str,
) -> Result<Option<Box<dyn ClaimedTask>>, MonitorError> {
    let mut tx = pool.begin().await?;

    let task = sqlx::query_as::<_, TaskRecord>(
        r#"
        SELECT id, task_id, service_name, job_id, monitor_url,
               status::text AS status, success_conditions, failure_conditions,
               check_interval, timeout_at, assigned_instance, last_heartbeat,
               retry_count, max_retries, result, created_at, completed_at
        FROM monitor_tasks
        WHERE task_id = $1 AND assigned_instance = $2 AND status = 'running'
        FOR UPDATE
        "#,
    )
    .bind(task_id)
    .bind(instance_id)
    .fetch_optional(&mut *tx)
    .await?;

    match task {
        Some(task) => Ok(Some(Box::new(PgClaimedTask { tx, task }))),
        None => Ok(None),
    }
}

// ============================================================================
// Trait implementation
// ============================================================================

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create_task(&self, task: &NewTask) -> Result<TaskRecord, MonitorError> {
        create_task(&self.pool, task).await
    }

    async fn find_active(
        &self,
        service_name: &str,
        job_id: &str,
    ) -> Result<Option<TaskRecord>, MonitorError> {
        find_active(&self.pool, service_name, job_id).await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, MonitorError> {
        get_task(&self.pool, task_id).await
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, MonitorError> {
        list_tasks(&self.pool, status, limit).await
    }

    async fn mark_running(&self, task_id: &str) -> Result<(), MonitorError> {
        mark_running(&self.pool, task_id).await
    }

    async fn claim_for_check(
        &self,
        task_id: &str,
        instance_id: &str,
    ) -> Result<Option<Box<dyn ClaimedTask>>, MonitorError> {
        claim_for_check(&self.pool, task_id, instance_id).await
    }

    async fn claim_orphans(
        &self,
        instance_id: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, MonitorError> {
        claim_orphans(&self.pool, instance_id, stale_before, now, limit).await
    }

    async fn claim_startup(
        &self,
        instance_id: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, MonitorError> {
        claim_startup(&self.pool, instance_id, stale_before, now).await
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>, MonitorError> {
        expire_overdue(&self.pool, now).await
    }

    async fn complete_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, MonitorError> {
        complete_task(&self.pool, task_id, status, result, now).await
    }

    async fn health_check(&self) -> Result<bool, MonitorError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
