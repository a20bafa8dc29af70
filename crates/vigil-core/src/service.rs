// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Monitoring coordinator.
//!
//! [`MonitorService`] owns the check cycles of one instance: it creates
//! tasks, schedules their probe jobs, runs the periodic recovery sweep, and
//! adopts work abandoned by crashed instances. Several instances may share
//! one task store; coordination happens entirely through store claims, so
//! instances never talk to each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conditions::{ConditionSpec, matches_spec};
use crate::config::Config;
use crate::error::{MonitorError, Result};
use crate::notify::{NoopNotifier, Notifier, TaskUpdate};
use crate::probe::ProbeRegistry;
use crate::scheduler::{JobControl, Scheduler};
use crate::store::{NewTask, TaskRecord, TaskStatus, TaskStore};

const RECOVERY_JOB_ID: &str = "recovery-sweep";
const ORPHAN_CLAIM_LIMIT: i64 = 100;
const DEFAULT_CHECK_INTERVAL: i64 = 30;

/// Tuning knobs shared by every task this instance creates or recovers.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Heartbeat staleness threshold before a running task counts as orphaned.
    pub heartbeat_timeout: Duration,
    /// Period of the recovery sweep.
    pub recovery_interval: Duration,
    /// Global deadline applied to newly created tasks.
    pub task_timeout: Duration,
    /// Orphan reclaim bound applied to newly created tasks.
    pub max_retries: i32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(120),
            recovery_interval: Duration::from_secs(60),
            task_timeout: Duration::from_secs(1800),
            max_retries: 3,
        }
    }
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout,
            recovery_interval: config.recovery_interval,
            task_timeout: config.task_timeout,
            max_retries: config.max_retries,
        }
    }
}

/// Request to start monitoring one job of a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRequest {
    /// Service name; selects the probe implementation.
    pub service_name: String,
    /// Job identifier within the service.
    pub job_id: String,
    /// Address to probe.
    pub monitor_url: String,
    /// Conditions that complete the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_conditions: Option<ConditionSpec>,
    /// Conditions that fail the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_conditions: Option<ConditionSpec>,
    /// Seconds between probe cycles; defaults to 30.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<i64>,
}

/// Read-only view of a monitoring task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub task_id: String,
    /// Monitored service name.
    pub service_name: String,
    /// Job identifier within the service.
    pub job_id: String,
    /// Address being probed.
    pub monitor_url: String,
    /// Current lifecycle status.
    pub status: String,
    /// Seconds between probe cycles.
    pub check_interval: i64,
    /// Absolute deadline.
    pub timeout_at: DateTime<Utc>,
    /// Instance currently owning the lease.
    pub assigned_instance: Option<String>,
    /// Last heartbeat written by the owner.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Times the task was reclaimed after being orphaned.
    pub retry_count: i32,
    /// Reclaim bound.
    pub max_retries: i32,
    /// Terminal result payload, if any.
    pub result: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Terminal transition time, if any.
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<TaskRecord> for TaskSnapshot {
    fn from(record: TaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            service_name: record.service_name,
            job_id: record.job_id,
            monitor_url: record.monitor_url,
            status: record.status,
            check_interval: record.check_interval,
            timeout_at: record.timeout_at,
            assigned_instance: record.assigned_instance,
            last_heartbeat: record.last_heartbeat,
            retry_count: record.retry_count,
            max_retries: record.max_retries,
            result: record.result,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}

struct Inner {
    store: Arc<dyn TaskStore>,
    probes: ProbeRegistry,
    notifier: Arc<dyn Notifier>,
    scheduler: Scheduler,
    settings: MonitorSettings,
    instance_id: String,
}

/// Monitoring coordinator for one instance.
///
/// Cheap to clone; clones share the same scheduler and store.
#[derive(Clone)]
pub struct MonitorService {
    inner: Arc<Inner>,
}

/// Builder for [`MonitorService`].
pub struct MonitorServiceBuilder {
    store: Option<Arc<dyn TaskStore>>,
    probes: Option<ProbeRegistry>,
    notifier: Option<Arc<dyn Notifier>>,
    instance_id: Option<String>,
    settings: MonitorSettings,
}

impl MonitorServiceBuilder {
    /// Set the task store (required).
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the default probe registry.
    pub fn probes(mut self, probes: ProbeRegistry) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Set the terminal-transition notifier.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Override the generated instance identity.
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Override the default settings.
    pub fn settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the service.
    pub fn build(self) -> Result<MonitorService> {
        let store = self.store.ok_or_else(|| MonitorError::ValidationError {
            field: "store".to_string(),
            message: "a task store is required".to_string(),
        })?;

        Ok(MonitorService {
            inner: Arc::new(Inner {
                store,
                probes: self.probes.unwrap_or_else(ProbeRegistry::with_defaults),
                notifier: self
                    .notifier
                    .unwrap_or_else(|| Arc::new(NoopNotifier)),
                scheduler: Scheduler::new(),
                settings: self.settings,
                instance_id: self
                    .instance_id
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            }),
        })
    }
}

impl MonitorService {
    /// Start building a service.
    pub fn builder() -> MonitorServiceBuilder {
        MonitorServiceBuilder {
            store: None,
            probes: None,
            notifier: None,
            instance_id: None,
            settings: MonitorSettings::default(),
        }
    }

    /// This instance's identity as written into task leases.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Start the coordinator.
    ///
    /// Runs the startup recovery scan (expire overdue tasks, re-adopt tasks
    /// this identity owned before a restart, stale orphans, and unassigned
    /// pending tasks), then installs the periodic recovery sweep.
    pub async fn start(&self) -> Result<()> {
        info!(instance_id = %self.inner.instance_id, "Starting monitor service");

        let now = Utc::now();

        let expired = self.inner.store.expire_overdue(now).await?;
        for task in &expired {
            self.inner.scheduler.cancel(&task.task_id).await;
            self.notify_terminal(task).await;
        }

        let claimed = self
            .inner
            .store
            .claim_startup(&self.inner.instance_id, self.stale_before(now), now)
            .await?;
        for task in &claimed {
            info!(task_id = %task.task_id, service_name = %task.service_name, "Recovered task at startup");
            self.schedule_check_job(&task.task_id, task.check_interval)
                .await;
        }

        let sweep = self.clone();
        self.inner
            .scheduler
            .schedule(
                RECOVERY_JOB_ID,
                self.inner.settings.recovery_interval,
                move || {
                    let sweep = sweep.clone();
                    async move {
                        if let Err(e) = sweep.run_recovery_sweep().await {
                            warn!(error = %e, "Recovery sweep failed");
                        }
                        JobControl::Continue
                    }
                },
            )
            .await;

        info!(
            recovered = claimed.len(),
            expired = expired.len(),
            "Monitor service started"
        );
        Ok(())
    }

    /// Stop the coordinator.
    ///
    /// Cancels every local timer without touching task rows; another
    /// instance (or a restart) adopts the abandoned tasks through recovery.
    pub async fn stop(&self) {
        self.inner.scheduler.cancel_all().await;
        info!(instance_id = %self.inner.instance_id, "Monitor service stopped");
    }

    /// Start monitoring a job.
    ///
    /// Idempotent per active (service_name, job_id): when an active task
    /// already exists its id is returned and nothing is created.
    pub async fn start_monitoring(&self, request: MonitorRequest) -> Result<String> {
        validate_request(&request)?;

        if let Some(existing) = self
            .inner
            .store
            .find_active(&request.service_name, &request.job_id)
            .await?
        {
            info!(
                task_id = %existing.task_id,
                service_name = %request.service_name,
                job_id = %request.job_id,
                "Monitoring task already exists"
            );
            return Ok(existing.task_id);
        }

        let now = Utc::now();
        let task_id = Uuid::new_v4().to_string();
        let check_interval = request.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL);
        let timeout_at =
            now + chrono::Duration::seconds(self.inner.settings.task_timeout.as_secs() as i64);

        let new_task = NewTask {
            task_id: task_id.clone(),
            service_name: request.service_name.clone(),
            job_id: request.job_id.clone(),
            monitor_url: request.monitor_url,
            success_conditions: serialize_spec(request.success_conditions)?,
            failure_conditions: serialize_spec(request.failure_conditions)?,
            check_interval,
            timeout_at,
            assigned_instance: self.inner.instance_id.clone(),
            max_retries: self.inner.settings.max_retries,
            created_at: now,
        };

        match self.inner.store.create_task(&new_task).await {
            Ok(_) => {}
            // Lost a creation race; the winner's task id is the answer
            Err(MonitorError::DuplicateActiveTask { .. }) => {
                if let Some(existing) = self
                    .inner
                    .store
                    .find_active(&request.service_name, &request.job_id)
                    .await?
                {
                    return Ok(existing.task_id);
                }
                return Err(MonitorError::DuplicateActiveTask {
                    service_name: request.service_name,
                    job_id: request.job_id,
                });
            }
            Err(e) => return Err(e),
        }

        self.schedule_check_job(&task_id, check_interval).await;
        self.inner.store.mark_running(&task_id).await?;

        info!(
            task_id = %task_id,
            service_name = %request.service_name,
            job_id = %request.job_id,
            check_interval,
            "Started monitoring"
        );
        Ok(task_id)
    }

    /// Current view of a task, or `None` if the id is unknown.
    pub async fn get_status(&self, task_id: &str) -> Result<Option<TaskSnapshot>> {
        Ok(self.inner.store.get_task(task_id).await?.map(Into::into))
    }

    /// List tasks, newest first, optionally filtered by status.
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<TaskSnapshot>> {
        Ok(self
            .inner
            .store
            .list_tasks(status, limit)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    /// Stop monitoring a task.
    ///
    /// Cancels the local timer and records `stopped`. Stopping an already
    /// terminal task is a no-op; an unknown id is an error.
    pub async fn stop_monitoring(&self, task_id: &str) -> Result<()> {
        let task = self
            .inner
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| MonitorError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        self.inner.scheduler.cancel(task_id).await;

        if task.task_status().is_terminal() {
            return Ok(());
        }

        let changed = self
            .inner
            .store
            .complete_task(
                task_id,
                TaskStatus::Stopped,
                r#"{"message":"Monitoring stopped by request"}"#,
                Utc::now(),
            )
            .await?;

        if changed {
            info!(task_id, "Stopped monitoring");
            if let Some(task) = self.inner.store.get_task(task_id).await? {
                self.notify_terminal(&task).await;
            }
        }
        Ok(())
    }

    /// Run one recovery sweep.
    ///
    /// First force-terminates every active task past its deadline, then
    /// adopts orphans whose owner stopped heartbeating. Adopted tasks past
    /// their retry bound are failed instead of rescheduled. Runs
    /// periodically after [`start`](Self::start); public for embedders that
    /// drive recovery themselves.
    pub async fn run_recovery_sweep(&self) -> Result<()> {
        let now = Utc::now();

        let expired = self.inner.store.expire_overdue(now).await?;
        for task in &expired {
            info!(task_id = %task.task_id, "Task expired at global deadline");
            self.inner.scheduler.cancel(&task.task_id).await;
            self.notify_terminal(task).await;
        }

        let orphans = self
            .inner
            .store
            .claim_orphans(
                &self.inner.instance_id,
                self.stale_before(now),
                now,
                ORPHAN_CLAIM_LIMIT,
            )
            .await?;

        for task in &orphans {
            // The claim fails exhausted rows in the same statement; they come
            // back already terminal
            if task.task_status() == TaskStatus::Failed {
                warn!(
                    task_id = %task.task_id,
                    retry_count = task.retry_count,
                    "Orphaned task exceeded retry bound"
                );
                self.notify_terminal(task).await;
                continue;
            }

            info!(
                task_id = %task.task_id,
                service_name = %task.service_name,
                retry_count = task.retry_count,
                "Adopted orphaned task"
            );
            self.schedule_check_job(&task.task_id, task.check_interval)
                .await;
        }

        Ok(())
    }

    /// Run one check cycle for a task. Used by the scheduled probe job.
    async fn run_check(&self, task_id: &str) -> JobControl {
        match self.run_check_cycle(task_id).await {
            Ok(control) => control,
            Err(e) => {
                warn!(task_id, error = %e, "Check cycle failed");
                // Best effort; if the store is down this fails too and the
                // next tick retries
                let result =
                    serde_json::json!({"error": format!("Monitoring error: {e}")}).to_string();
                match self
                    .inner
                    .store
                    .complete_task(task_id, TaskStatus::Failed, &result, Utc::now())
                    .await
                {
                    Ok(true) => {
                        if let Ok(Some(task)) = self.inner.store.get_task(task_id).await {
                            self.notify_terminal(&task).await;
                        }
                        JobControl::Stop
                    }
                    Ok(false) => JobControl::Stop,
                    Err(_) => JobControl::Continue,
                }
            }
        }
    }

    async fn run_check_cycle(&self, task_id: &str) -> Result<JobControl> {
        let now = Utc::now();

        let Some(claim) = self
            .inner
            .store
            .claim_for_check(task_id, &self.inner.instance_id)
            .await?
        else {
            // Not running anymore, or the lease moved to another instance
            debug!(task_id, "Check skipped; retiring local timer");
            return Ok(JobControl::Stop);
        };

        let task = claim.task().clone();

        if task.timeout_at <= now {
            claim
                .complete(TaskStatus::Timeout, crate::store::TIMEOUT_RESULT, now)
                .await?;
            info!(task_id, "Task expired at global deadline");
            self.notify_completed(&task, TaskStatus::Timeout, Some(crate::store::TIMEOUT_RESULT))
                .await;
            return Ok(JobControl::Stop);
        }

        let probe = self.inner.probes.resolve(&task.service_name);
        let report = probe.check(&task.monitor_url).await;

        if matches_spec(&report, task.success_conditions.as_deref()) {
            let result = report.to_json();
            claim.complete(TaskStatus::Completed, &result, now).await?;
            info!(task_id, "Success conditions met");
            self.notify_completed(&task, TaskStatus::Completed, Some(&result))
                .await;
            return Ok(JobControl::Stop);
        }

        if matches_spec(&report, task.failure_conditions.as_deref()) {
            let result = report.to_json();
            claim.complete(TaskStatus::Failed, &result, now).await?;
            info!(task_id, "Failure conditions met");
            self.notify_completed(&task, TaskStatus::Failed, Some(&result))
                .await;
            return Ok(JobControl::Stop);
        }

        claim.heartbeat(now).await?;
        Ok(JobControl::Continue)
    }

    async fn schedule_check_job(&self, task_id: &str, check_interval: i64) {
        let period = Duration::from_secs(check_interval.max(1) as u64);
        let service = self.clone();
        let id = task_id.to_string();
        self.inner
            .scheduler
            .schedule(task_id, period, move || {
                let service = service.clone();
                let id = id.clone();
                async move { service.run_check(&id).await }
            })
            .await;
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::seconds(self.inner.settings.heartbeat_timeout.as_secs() as i64)
    }

    async fn notify_terminal(&self, task: &TaskRecord) {
        let update = TaskUpdate {
            task_id: task.task_id.clone(),
            service_name: task.service_name.clone(),
            job_id: task.job_id.clone(),
            status: task.status.clone(),
            result: task.result.clone(),
        };
        self.inner.notifier.notify(&update).await;
    }

    async fn notify_completed(&self, task: &TaskRecord, status: TaskStatus, result: Option<&str>) {
        let update = TaskUpdate {
            task_id: task.task_id.clone(),
            service_name: task.service_name.clone(),
            job_id: task.job_id.clone(),
            status: status.as_str().to_string(),
            result: result.map(str::to_string),
        };
        self.inner.notifier.notify(&update).await;
    }
}

fn validate_request(request: &MonitorRequest) -> Result<()> {
    fn required(field: &'static str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(MonitorError::ValidationError {
                field: field.to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    required("service_name", &request.service_name)?;
    required("job_id", &request.job_id)?;
    required("monitor_url", &request.monitor_url)?;

    if let Some(interval) = request.check_interval
        && interval < 1
    {
        return Err(MonitorError::ValidationError {
            field: "check_interval".to_string(),
            message: "must be at least 1 second".to_string(),
        });
    }
    Ok(())
}

fn serialize_spec(spec: Option<ConditionSpec>) -> Result<Option<String>> {
    match spec {
        Some(spec) if !spec.is_empty() => Ok(Some(serde_json::to_string(&spec)?)),
        _ => Ok(None),
    }
}
