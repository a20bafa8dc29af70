// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vigil Core - Multi-Instance Monitoring Coordinator
//!
//! This crate watches long-running jobs in third-party services by polling
//! them until a success or failure condition matches, a global deadline
//! passes, or an operator stops the task. Several coordinator instances can
//! run against one shared database; if an instance dies, its tasks are
//! adopted by the survivors.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Embedding Application                    │
//! │                  (API layer, CLI, server)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MonitorService                          │
//! │   start_monitoring / get_status / stop_monitoring / sweep   │
//! └─────────────────────────────────────────────────────────────┘
//!        │                  │                      │
//!        ▼                  ▼                      ▼
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  Scheduler   │   │ ProbeRegistry│   │     TaskStore      │
//! │ (tokio jobs) │   │  HTTP / DB   │   │ Postgres / SQLite  │
//! └──────────────┘   └──────────────┘   └────────────────────┘
//!                                                  │
//!                                                  ▼
//!                                       ┌────────────────────┐
//!                                       │  Shared Database   │
//!                                       │ (leases, heartbeats)│
//!                                       └────────────────────┘
//! ```
//!
//! The database is the only shared resource. Instances coordinate through
//! row-level claims: each running task carries a lease (`assigned_instance`)
//! refreshed by heartbeats, and the recovery sweep re-assigns tasks whose
//! heartbeat went stale.
//!
//! # Task State Machine
//!
//! ```text
//!              ┌─────────┐
//!              │ PENDING │
//!              └────┬────┘
//!                   │ probe job scheduled
//!                   ▼
//!              ┌─────────┐
//!   ┌──────────│ RUNNING │───────────┬───────────┐
//!   │          └────┬────┘           │           │
//!   │               │                │           │
//! success       failure /        deadline      stop
//!   │          retries spent         │           │
//!   ▼               ▼                ▼           ▼
//! ┌───────────┐ ┌────────┐     ┌─────────┐ ┌─────────┐
//! │ COMPLETED │ │ FAILED │     │ TIMEOUT │ │ STOPPED │
//! └───────────┘ └────────┘     └─────────┘ └─────────┘
//! ```
//!
//! Terminal states are final; `completed_at` and `result` are written
//! exactly once. When both condition sets match the same observation,
//! success wins.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `VIGIL_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `VIGIL_HEARTBEAT_TIMEOUT_SECS` | No | `120` | Staleness threshold for orphan detection |
//! | `VIGIL_RECOVERY_INTERVAL_SECS` | No | `60` | Recovery sweep period |
//! | `VIGIL_TASK_TIMEOUT_SECS` | No | `1800` | Global deadline for new tasks |
//! | `VIGIL_MAX_RETRIES` | No | `3` | Orphan reclaim bound for new tasks |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`conditions`]: Condition specs and their fail-closed evaluator
//! - [`error`]: Error types with stable error codes
//! - [`migrations`]: Embedded database migrations
//! - [`notify`]: Terminal-transition notifications
//! - [`probe`]: HTTP and database probes plus the probe registry
//! - [`scheduler`]: In-process periodic job scheduler
//! - [`service`]: The monitoring coordinator
//! - [`store`]: Task store trait and Postgres/SQLite backends

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Success/failure condition specs and their evaluator.
pub mod conditions;

/// Error types for monitoring operations.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Terminal-transition notifications.
pub mod notify;

/// Service probes and the probe registry.
pub mod probe;

/// In-process periodic job scheduler.
pub mod scheduler;

/// The monitoring coordinator.
pub mod service;

/// Task store trait and backends.
pub mod store;

pub use conditions::ConditionSpec;
pub use error::{MonitorError, Result};
pub use notify::{Notifier, TaskUpdate};
pub use probe::{Probe, ProbeRegistry, ProbeReport};
pub use service::{MonitorRequest, MonitorService, MonitorSettings, TaskSnapshot};
pub use store::{TaskStatus, TaskStore};
