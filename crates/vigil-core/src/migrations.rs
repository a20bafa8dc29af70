// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for vigil-core.
//!
//! Both backends embed the same `monitor_tasks` schema: the task table, its
//! status/heartbeat indexes, and the partial unique index that enforces at
//! most one active task per (service_name, job_id). Embedders that manage
//! their own pool run the migrator matching their backend:
//!
//! ```ignore
//! use sqlx::SqlitePool;
//! use vigil_core::migrations;
//!
//! let pool = SqlitePool::connect("sqlite:vigil.db?mode=rwc").await?;
//! migrations::run_sqlite(&pool).await?;
//! ```
//!
//! [`SqliteTaskStore::from_path`](crate::store::SqliteTaskStore::from_path)
//! and the server binary run these automatically.

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator with the monitor_tasks schema embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// SQLite migrator with the monitor_tasks schema embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Apply all pending PostgreSQL migrations.
///
/// Idempotent; already-applied migrations are skipped.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

/// Apply all pending SQLite migrations.
///
/// Idempotent; already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
