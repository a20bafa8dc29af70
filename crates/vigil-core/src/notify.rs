// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Terminal-transition notifications.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Message emitted when a task reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// Task identifier.
    pub task_id: String,
    /// Monitored service name.
    pub service_name: String,
    /// Job identifier within the service.
    pub job_id: String,
    /// Terminal status string.
    pub status: String,
    /// Terminal result payload, if any.
    pub result: Option<String>,
}

/// Receives terminal-transition notifications.
///
/// Delivery is best-effort: implementations must not panic, and the caller
/// ignores any failure to deliver.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one update.
    async fn notify(&self, update: &TaskUpdate);
}

/// Notifier that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _update: &TaskUpdate) {}
}

/// Notifier that logs every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, update: &TaskUpdate) {
        info!(
            task_id = %update.task_id,
            service_name = %update.service_name,
            job_id = %update.job_id,
            status = %update.status,
            "Task reached terminal state"
        );
    }
}
