// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task store interfaces and backends for vigil-core.
//!
//! This module defines the store abstraction and backend implementations.
//! The store is the only resource shared between instances; claim operations
//! rely on row-level locking so that two instances can never advance the same
//! task concurrently.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresTaskStore;
pub use self::sqlite::SqliteTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::MonitorError;

/// Lifecycle status of a monitoring task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, probe job not yet scheduled.
    Pending,
    /// Owned by an instance with a scheduled probe job.
    Running,
    /// A success condition matched.
    Completed,
    /// A failure condition matched, the check crashed, or retries were exhausted.
    Failed,
    /// The global deadline passed before any condition matched.
    Timeout,
    /// Stopped by an operator.
    Stopped,
}

impl TaskStatus {
    /// Status string as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Stopped => "stopped",
        }
    }

    /// Parse a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// True for `completed`, `failed`, `timeout`, and `stopped`.
    ///
    /// Terminal states are final: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Stopped
        )
    }

    /// True for `pending` and `running`.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitoring task row from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRecord {
    /// Database primary key.
    pub id: i64,
    /// Opaque unique identifier, generated at creation, immutable.
    pub task_id: String,
    /// Name of the monitored service; selects the probe implementation.
    pub service_name: String,
    /// Job identifier within the monitored service.
    pub job_id: String,
    /// Address to probe.
    pub monitor_url: String,
    /// Current status (pending, running, completed, failed, timeout, stopped).
    pub status: String,
    /// JSON success condition spec, if any.
    pub success_conditions: Option<String>,
    /// JSON failure condition spec, if any.
    pub failure_conditions: Option<String>,
    /// Seconds between probe cycles.
    pub check_interval: i64,
    /// Absolute deadline; the task is force-terminated once passed.
    pub timeout_at: DateTime<Utc>,
    /// Instance currently owning the lease; None means claimable.
    pub assigned_instance: Option<String>,
    /// Refreshed by the owning instance on every check cycle.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Times the task has been reclaimed after being orphaned.
    pub retry_count: i32,
    /// Reclaim bound before the task is permanently failed.
    pub max_retries: i32,
    /// Terminal JSON payload, set once on entering a terminal state.
    pub result: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task entered a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Parsed status; unknown strings are treated as `Failed` defensively
    /// so malformed rows never count as active.
    pub fn task_status(&self) -> TaskStatus {
        TaskStatus::parse(&self.status).unwrap_or(TaskStatus::Failed)
    }
}

/// Fields required to create a new monitoring task.
///
/// New tasks are always created in `pending`, owned by the creating instance.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Opaque unique identifier.
    pub task_id: String,
    /// Name of the monitored service.
    pub service_name: String,
    /// Job identifier within the monitored service.
    pub job_id: String,
    /// Address to probe.
    pub monitor_url: String,
    /// JSON success condition spec, if any.
    pub success_conditions: Option<String>,
    /// JSON failure condition spec, if any.
    pub failure_conditions: Option<String>,
    /// Seconds between probe cycles.
    pub check_interval: i64,
    /// Absolute deadline.
    pub timeout_at: DateTime<Utc>,
    /// Creating instance, which owns the task immediately.
    pub assigned_instance: String,
    /// Reclaim bound.
    pub max_retries: i32,
    /// Creation timestamp, also used as the initial heartbeat.
    pub created_at: DateTime<Utc>,
}

/// A task row claimed under a row lock for one check cycle.
///
/// The guard holds an open transaction with the row locked; exactly one of
/// [`heartbeat`](Self::heartbeat) or [`complete`](Self::complete) consumes it
/// and commits. Dropping the guard rolls the transaction back and releases
/// the lock without writing.
#[async_trait]
pub trait ClaimedTask: Send {
    /// The locked row as read inside the transaction.
    fn task(&self) -> &TaskRecord;

    /// Refresh the heartbeat and release the lock; the task keeps running.
    async fn heartbeat(self: Box<Self>, now: DateTime<Utc>) -> Result<(), MonitorError>;

    /// Write a terminal status and result, set `completed_at`, and commit.
    async fn complete(
        self: Box<Self>,
        status: TaskStatus,
        result: &str,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError>;
}

/// Store interface used by the monitoring coordinator.
///
/// Implementations must make every claim operation atomic with respect to
/// concurrent claims from other instances (row-level locking or an
/// equivalent compare-and-set update).
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task in `pending`.
    ///
    /// Fails with [`MonitorError::DuplicateActiveTask`] if an active task
    /// already exists for the (service_name, job_id) pair.
    async fn create_task(&self, task: &NewTask) -> Result<TaskRecord, MonitorError>;

    /// Find the active (`pending` or `running`) task for a service/job pair.
    async fn find_active(
        &self,
        service_name: &str,
        job_id: &str,
    ) -> Result<Option<TaskRecord>, MonitorError>;

    /// Get a task by its public identifier.
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, MonitorError>;

    /// List tasks, newest first, optionally filtered by status.
    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, MonitorError>;

    /// Transition a `pending` task to `running` once its probe job is scheduled.
    async fn mark_running(&self, task_id: &str) -> Result<(), MonitorError>;

    /// Lock the task row for one check cycle.
    ///
    /// Returns `None` when the task is not `running` or not owned by
    /// `instance_id` (lease conflict) - the caller skips the cycle.
    async fn claim_for_check(
        &self,
        task_id: &str,
        instance_id: &str,
    ) -> Result<Option<Box<dyn ClaimedTask>>, MonitorError>;

    /// Atomically take ownership of orphaned tasks.
    ///
    /// An orphan is a `running` task owned by another instance whose
    /// heartbeat is older than `stale_before` and whose deadline has not
    /// passed. Claimed rows get this instance as owner, a fresh heartbeat,
    /// and an incremented `retry_count`. Rows whose incremented count
    /// exceeds `max_retries` are failed in the same statement, so the store
    /// never holds a non-terminal row past its retry bound. The returned
    /// records reflect the post-claim state. Under concurrent sweeps each
    /// orphan is handed to exactly one instance.
    async fn claim_orphans(
        &self,
        instance_id: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, MonitorError>;

    /// One-time recovery scan at instance startup.
    ///
    /// Re-owns tasks already assigned to this instance identity, stale
    /// orphans, and unassigned `pending` tasks; all claimed rows become
    /// `running` with a fresh heartbeat. Tasks past their deadline are left
    /// for [`expire_overdue`](Self::expire_overdue).
    async fn claim_startup(
        &self,
        instance_id: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, MonitorError>;

    /// Force-terminate every active task whose deadline has passed.
    ///
    /// Applies regardless of ownership or heartbeat freshness.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>, MonitorError>;

    /// Write a terminal status outside of a check cycle (stop, exhausted retries).
    ///
    /// Returns false if the task was already terminal; `completed_at` is
    /// only ever written once.
    async fn complete_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, MonitorError>;

    /// Verify the database connection is alive.
    async fn health_check(&self) -> Result<bool, MonitorError>;
}

/// Result payload recorded when a task is terminated by the global deadline.
pub(crate) const TIMEOUT_RESULT: &str = r#"{"error":"Task globally timed out"}"#;

/// Result payload recorded when an orphan exceeds its retry bound.
pub(crate) const RETRY_EXHAUSTED_RESULT: &str =
    r#"{"error":"Max retries exceeded after instance failure"}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Timeout,
            TaskStatus::Stopped,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_status_terminality() {
        assert!(TaskStatus::Pending.is_active());
        assert!(TaskStatus::Running.is_active());
        for status in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Timeout,
            TaskStatus::Stopped,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_active());
        }
    }
}
