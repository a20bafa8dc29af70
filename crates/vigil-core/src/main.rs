// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vigil Core - Multi-Instance Monitoring Coordinator
//!
//! The standalone server is responsible for:
//! - Running check cycles for tasks owned by this instance
//! - Heartbeats and lease renewal
//! - Recovery of tasks orphaned by crashed instances
//!
//! Note: Task creation and status queries are exposed by whatever API layer
//! embeds vigil-core; this binary only drives the coordinator loop.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use vigil_core::config::Config;
use vigil_core::migrations;
use vigil_core::notify::LogNotifier;
use vigil_core::service::{MonitorService, MonitorSettings};
use vigil_core::store::{PostgresTaskStore, SqliteTaskStore, TaskStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vigil_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Vigil Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        heartbeat_timeout_secs = config.heartbeat_timeout.as_secs(),
        recovery_interval_secs = config.recovery_interval.as_secs(),
        task_timeout_secs = config.task_timeout.as_secs(),
        max_retries = config.max_retries,
        "Configuration loaded"
    );

    // Connect to the task store backend
    let store: Arc<dyn TaskStore> = if config.database_url.starts_with("sqlite:") {
        info!("Connecting to SQLite database...");
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;

        info!("Running database migrations...");
        migrations::run_sqlite(&pool).await?;

        Arc::new(SqliteTaskStore::new(pool))
    } else {
        info!("Connecting to PostgreSQL database...");
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        info!("Running database migrations...");
        migrations::run_postgres(&pool).await?;

        Arc::new(PostgresTaskStore::new(pool))
    };

    // Verify connection
    store.health_check().await?;
    info!("Database health check passed");

    let service = MonitorService::builder()
        .store(store)
        .notifier(Arc::new(LogNotifier))
        .settings(MonitorSettings::from(&config))
        .build()?;

    service.start().await?;
    info!(instance_id = %service.instance_id(), "Vigil Core initialized successfully");

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    service.stop().await;
    info!("Vigil Core stopped");
    Ok(())
}
