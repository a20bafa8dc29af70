// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for vigil-core.
//!
//! Provides a unified error type with stable error code strings for API layers.

use std::fmt;

/// Result type using MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while coordinating monitoring tasks.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum MonitorError {
    /// Task was not found in the database.
    TaskNotFound {
        /// The task ID that was not found.
        task_id: String,
    },

    /// An active task already exists for this (service_name, job_id) pair.
    ///
    /// Recoverable: callers should return the existing task instead of erroring.
    DuplicateActiveTask {
        /// The monitored service name.
        service_name: String,
        /// The monitored job ID.
        job_id: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl MonitorError {
    /// Get the stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::DuplicateActiveTask { .. } => "DUPLICATE_ACTIVE_TASK",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskNotFound { task_id } => {
                write!(f, "Monitoring task '{}' not found", task_id)
            }
            Self::DuplicateActiveTask {
                service_name,
                job_id,
            } => {
                write!(
                    f,
                    "An active monitoring task already exists for {}:{}",
                    service_name, job_id
                )
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<sqlx::Error> for MonitorError {
    fn from(err: sqlx::Error) -> Self {
        MonitorError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
