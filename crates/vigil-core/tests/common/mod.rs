// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for vigil-core integration tests.
//!
//! Provides a SQLite-backed TestContext plus a scriptable probe so lifecycle
//! and recovery behavior can be driven without real endpoints.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use vigil_core::migrations;
use vigil_core::notify::NoopNotifier;
use vigil_core::probe::{Probe, ProbeRegistry, ProbeReport};
use vigil_core::service::{MonitorRequest, MonitorService, MonitorSettings, TaskSnapshot};
use vigil_core::store::{SqliteTaskStore, TaskStatus, TaskStore};

/// Probe whose next report can be swapped at any time.
#[derive(Clone)]
pub struct MockProbe {
    payload: Arc<std::sync::Mutex<Value>>,
    calls: Arc<AtomicUsize>,
}

impl MockProbe {
    pub fn new(payload: Value) -> Self {
        Self {
            payload: Arc::new(std::sync::Mutex::new(payload)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the payload returned by subsequent checks.
    pub fn set(&self, payload: Value) {
        *self.payload.lock().unwrap() = payload;
    }

    /// Number of checks performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for MockProbe {
    async fn check(&self, _url: &str) -> ProbeReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ProbeReport::new(self.payload.lock().unwrap().clone())
    }
}

/// Test context around a temp-file SQLite store.
///
/// Keeps the raw pool so tests can rewrite rows into shapes the public API
/// never produces (stale heartbeats, dead owners, exhausted retries).
pub struct TestContext {
    pub store: Arc<SqliteTaskStore>,
    pub pool: SqlitePool,
    pub probe: MockProbe,
    _dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("vigil.db").display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("connect sqlite");
        migrations::run_sqlite(&pool).await.expect("run migrations");

        Self {
            store: Arc::new(SqliteTaskStore::new(pool.clone())),
            pool,
            probe: MockProbe::new(serde_json::json!({"status_code": 200})),
            _dir: dir,
        }
    }

    /// Build a coordinator wired to the shared store and the mock probe.
    pub fn service(&self, instance_id: &str, settings: MonitorSettings) -> MonitorService {
        MonitorService::builder()
            .store(self.store.clone() as Arc<dyn TaskStore>)
            .probes(ProbeRegistry::new(Arc::new(self.probe.clone())))
            .notifier(Arc::new(NoopNotifier))
            .instance_id(instance_id)
            .settings(settings)
            .build()
            .expect("build service")
    }

    /// Rewrite a row into an arbitrary lease state.
    pub async fn force_row(
        &self,
        task_id: &str,
        status: &str,
        assigned_instance: Option<&str>,
        last_heartbeat: Option<DateTime<Utc>>,
        timeout_at: DateTime<Utc>,
        retry_count: i32,
    ) {
        sqlx::query(
            r#"
            UPDATE monitor_tasks
            SET status = ?2,
                assigned_instance = ?3,
                last_heartbeat = ?4,
                timeout_at = ?5,
                retry_count = ?6
            WHERE task_id = ?1
            "#,
        )
        .bind(task_id)
        .bind(status)
        .bind(assigned_instance)
        .bind(last_heartbeat)
        .bind(timeout_at)
        .bind(retry_count)
        .execute(&self.pool)
        .await
        .expect("force row");
    }

    /// Create a task through the store and rewrite it into the given state.
    pub async fn seed_task(
        &self,
        task_id: &str,
        job_id: &str,
        status: &str,
        assigned_instance: Option<&str>,
        last_heartbeat: Option<DateTime<Utc>>,
        timeout_at: DateTime<Utc>,
        retry_count: i32,
    ) {
        let now = Utc::now();
        let new_task = vigil_core::store::NewTask {
            task_id: task_id.to_string(),
            service_name: "http".to_string(),
            job_id: job_id.to_string(),
            monitor_url: "http://localhost/health".to_string(),
            success_conditions: Some(r#"{"status_code": 200}"#.to_string()),
            failure_conditions: None,
            check_interval: 1,
            timeout_at,
            assigned_instance: assigned_instance.unwrap_or("seed").to_string(),
            max_retries: 3,
            created_at: now,
        };
        self.store.create_task(&new_task).await.expect("seed task");
        self.force_row(
            task_id,
            status,
            assigned_instance,
            last_heartbeat,
            timeout_at,
            retry_count,
        )
        .await;
    }
}

/// Settings with second-scale timing so tests finish quickly.
pub fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        heartbeat_timeout: Duration::from_secs(2),
        recovery_interval: Duration::from_secs(3600),
        task_timeout: Duration::from_secs(300),
        max_retries: 3,
    }
}

/// Minimal request for a 1-second check cycle.
pub fn request(job_id: &str, success: Option<&str>, failure: Option<&str>) -> MonitorRequest {
    MonitorRequest {
        service_name: "http".to_string(),
        job_id: job_id.to_string(),
        monitor_url: "http://localhost/health".to_string(),
        success_conditions: success.map(|s| serde_json::from_str(s).expect("success spec")),
        failure_conditions: failure.map(|s| serde_json::from_str(s).expect("failure spec")),
        check_interval: Some(1),
    }
}

/// Poll until the task reaches `status` or the deadline passes.
pub async fn wait_for_status(
    service: &MonitorService,
    task_id: &str,
    status: TaskStatus,
    deadline: Duration,
) -> TaskSnapshot {
    let start = std::time::Instant::now();
    loop {
        let snapshot = service
            .get_status(task_id)
            .await
            .expect("get status")
            .expect("task exists");
        if snapshot.status == status.as_str() {
            return snapshot;
        }
        assert!(
            start.elapsed() < deadline,
            "task {} stuck in '{}' while waiting for '{}'",
            task_id,
            snapshot.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
