// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task lifecycle tests: creation, check cycles, conditions, stop.

mod common;

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use common::{TestContext, fast_settings, request, wait_for_status};
use vigil_core::MonitorError;
use vigil_core::store::{TaskStatus, TaskStore};

#[tokio::test]
async fn test_start_monitoring_is_idempotent() {
    let ctx = TestContext::new().await;
    let service = ctx.service("instance-a", fast_settings());

    let first = service
        .start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();
    let second = service
        .start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();
    assert_eq!(first, second);

    let other = service
        .start_monitoring(request("job-2", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();
    assert_ne!(first, other);

    service.stop().await;
}

#[tokio::test]
async fn test_task_starts_running_and_owned() {
    let ctx = TestContext::new().await;
    let service = ctx.service("instance-a", fast_settings());

    let task_id = service
        .start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();

    let snapshot = service.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, "running");
    assert_eq!(snapshot.assigned_instance.as_deref(), Some("instance-a"));
    assert_eq!(snapshot.check_interval, 1);
    assert!(snapshot.last_heartbeat.is_some());
    assert!(snapshot.completed_at.is_none());

    service.stop().await;
}

#[tokio::test]
async fn test_success_condition_completes_task() {
    let ctx = TestContext::new().await;
    ctx.probe.set(json!({"status_code": 200, "body": "done"}));
    let service = ctx.service("instance-a", fast_settings());

    let task_id = service
        .start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();

    let snapshot =
        wait_for_status(&service, &task_id, TaskStatus::Completed, Duration::from_secs(10)).await;
    assert!(snapshot.completed_at.is_some());
    let result: serde_json::Value =
        serde_json::from_str(snapshot.result.as_deref().unwrap()).unwrap();
    assert_eq!(result["status_code"], 200);

    service.stop().await;
}

#[tokio::test]
async fn test_failure_condition_fails_task() {
    let ctx = TestContext::new().await;
    ctx.probe.set(json!({"status_code": 500}));
    let service = ctx.service("instance-a", fast_settings());

    let task_id = service
        .start_monitoring(request(
            "job-1",
            Some(r#"{"status_code": 200}"#),
            Some(r#"{"status_code": 500}"#),
        ))
        .await
        .unwrap();

    let snapshot =
        wait_for_status(&service, &task_id, TaskStatus::Failed, Duration::from_secs(10)).await;
    assert!(snapshot.completed_at.is_some());

    service.stop().await;
}

#[tokio::test]
async fn test_success_wins_when_both_conditions_match() {
    let ctx = TestContext::new().await;
    // Matches both the success spec (body) and the failure spec (status)
    ctx.probe.set(json!({"status_code": 500, "body": "recovered ok"}));
    let service = ctx.service("instance-a", fast_settings());

    let task_id = service
        .start_monitoring(request(
            "job-1",
            Some(r#"{"body_contains": "ok"}"#),
            Some(r#"{"status_code": 500}"#),
        ))
        .await
        .unwrap();

    wait_for_status(&service, &task_id, TaskStatus::Completed, Duration::from_secs(10)).await;

    service.stop().await;
}

#[tokio::test]
async fn test_unmatched_observation_keeps_task_running() {
    let ctx = TestContext::new().await;
    ctx.probe.set(json!({"status_code": 503}));
    let service = ctx.service("instance-a", fast_settings());

    let task_id = service
        .start_monitoring(request(
            "job-1",
            Some(r#"{"status_code": 200}"#),
            Some(r#"{"status_code": 500}"#),
        ))
        .await
        .unwrap();

    let before = service.get_status(&task_id).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    let after = service.get_status(&task_id).await.unwrap().unwrap();

    assert_eq!(after.status, "running");
    assert!(ctx.probe.calls() >= 2);
    // Heartbeat refreshed on every inconclusive cycle
    assert!(after.last_heartbeat.unwrap() > before.last_heartbeat.unwrap());

    service.stop().await;
}

#[tokio::test]
async fn test_probe_error_never_terminates_task() {
    let ctx = TestContext::new().await;
    ctx.probe
        .set(json!({"error": "HTTP request failed: connection refused", "status_code": 200}));
    let service = ctx.service("instance-a", fast_settings());

    let task_id = service
        .start_monitoring(request(
            "job-1",
            Some(r#"{"status_code": 200}"#),
            Some(r#"{"status_code": 200}"#),
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    let snapshot = service.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, "running");

    service.stop().await;
}

#[tokio::test]
async fn test_stop_monitoring() {
    let ctx = TestContext::new().await;
    ctx.probe.set(json!({"status_code": 503}));
    let service = ctx.service("instance-a", fast_settings());

    let task_id = service
        .start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();

    service.stop_monitoring(&task_id).await.unwrap();

    let snapshot = service.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, "stopped");
    assert!(snapshot.completed_at.is_some());
    assert!(snapshot.result.as_deref().unwrap().contains("stopped"));

    // Stopping a terminal task is a no-op
    service.stop_monitoring(&task_id).await.unwrap();
    let again = service.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(again.completed_at, snapshot.completed_at);

    // The pair is free for a new task once the old one is terminal
    let replacement = service
        .start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();
    assert_ne!(replacement, task_id);

    service.stop().await;
}

#[tokio::test]
async fn test_stop_monitoring_unknown_task() {
    let ctx = TestContext::new().await;
    let service = ctx.service("instance-a", fast_settings());

    let err = service.stop_monitoring("no-such-task").await.unwrap_err();
    assert!(matches!(err, MonitorError::TaskNotFound { .. }));
    assert_eq!(err.error_code(), "TASK_NOT_FOUND");
}

#[tokio::test]
async fn test_global_timeout_terminates_task() {
    let ctx = TestContext::new().await;
    ctx.probe.set(json!({"status_code": 503}));
    let mut settings = fast_settings();
    settings.task_timeout = Duration::from_secs(1);
    let service = ctx.service("instance-a", settings);

    let task_id = service
        .start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();

    let snapshot =
        wait_for_status(&service, &task_id, TaskStatus::Timeout, Duration::from_secs(10)).await;
    assert!(snapshot.result.as_deref().unwrap().contains("timed out"));

    service.stop().await;
}

#[tokio::test]
async fn test_deadline_wins_over_matching_conditions() {
    let ctx = TestContext::new().await;
    // The endpoint would satisfy the success spec on the very first probe
    ctx.probe.set(json!({"status_code": 200}));
    let service = ctx.service("instance-a", fast_settings());

    let task_id = service
        .start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();

    // Push the deadline into the past before the first cycle fires
    let now = Utc::now();
    ctx.force_row(
        &task_id,
        "running",
        Some("instance-a"),
        Some(now),
        now - chrono::Duration::seconds(60),
        0,
    )
    .await;

    let snapshot =
        wait_for_status(&service, &task_id, TaskStatus::Timeout, Duration::from_secs(10)).await;
    assert!(snapshot.result.as_deref().unwrap().contains("timed out"));
    // The deadline is checked before the endpoint is ever probed
    assert_eq!(ctx.probe.calls(), 0);

    service.stop().await;
}

#[tokio::test]
async fn test_list_tasks_filters_by_status() {
    let ctx = TestContext::new().await;
    ctx.probe.set(json!({"status_code": 503}));
    let service = ctx.service("instance-a", fast_settings());

    let running = service
        .start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();
    let stopped = service
        .start_monitoring(request("job-2", Some(r#"{"status_code": 200}"#), None))
        .await
        .unwrap();
    service.stop_monitoring(&stopped).await.unwrap();

    let all = service.list_tasks(None, 50).await.unwrap();
    assert_eq!(all.len(), 2);

    let only_running = service
        .list_tasks(Some(TaskStatus::Running), 50)
        .await
        .unwrap();
    assert_eq!(only_running.len(), 1);
    assert_eq!(only_running[0].task_id, running);

    let only_stopped = service
        .list_tasks(Some(TaskStatus::Stopped), 50)
        .await
        .unwrap();
    assert_eq!(only_stopped.len(), 1);
    assert_eq!(only_stopped[0].task_id, stopped);

    service.stop().await;
}

#[tokio::test]
async fn test_duplicate_creation_race_returns_existing_id() {
    let ctx = TestContext::new().await;
    ctx.probe.set(json!({"status_code": 503}));
    let service_a = ctx.service("instance-a", fast_settings());
    let service_b = ctx.service("instance-b", fast_settings());

    let (a, b) = tokio::join!(
        service_a.start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None)),
        service_b.start_monitoring(request("job-1", Some(r#"{"status_code": 200}"#), None)),
    );
    assert_eq!(a.unwrap(), b.unwrap());

    let active = ctx.store.find_active("http", "job-1").await.unwrap();
    assert!(active.is_some());

    service_a.stop().await;
    service_b.stop().await;
}
