// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Vigil Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Heartbeat staleness threshold before a running task counts as orphaned
    pub heartbeat_timeout: Duration,
    /// Period of the orphan recovery sweep
    pub recovery_interval: Duration,
    /// Global deadline applied to newly created tasks
    pub task_timeout: Duration,
    /// Orphan reclaim bound applied to newly created tasks
    pub max_retries: i32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `VIGIL_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `VIGIL_HEARTBEAT_TIMEOUT_SECS`: orphan detection threshold (default: 120)
    /// - `VIGIL_RECOVERY_INTERVAL_SECS`: recovery sweep period (default: 60)
    /// - `VIGIL_TASK_TIMEOUT_SECS`: global task deadline (default: 1800)
    /// - `VIGIL_MAX_RETRIES`: orphan reclaim bound (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("VIGIL_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("VIGIL_DATABASE_URL"))?;

        let heartbeat_timeout = secs_var("VIGIL_HEARTBEAT_TIMEOUT_SECS", 120)?;
        let recovery_interval = secs_var("VIGIL_RECOVERY_INTERVAL_SECS", 60)?;
        let task_timeout = secs_var("VIGIL_TASK_TIMEOUT_SECS", 1800)?;

        let max_retries: i32 = std::env::var("VIGIL_MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("VIGIL_MAX_RETRIES", "must be an integer"))?;
        if max_retries < 0 {
            return Err(ConfigError::Invalid(
                "VIGIL_MAX_RETRIES",
                "must not be negative",
            ));
        }

        Ok(Self {
            database_url,
            heartbeat_timeout,
            recovery_interval,
            task_timeout,
            max_retries,
        })
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, "must be a positive number of seconds"))?;
    if secs == 0 {
        return Err(ConfigError::Invalid(
            name,
            "must be a positive number of seconds",
        ));
    }
    Ok(Duration::from_secs(secs))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("VIGIL_DATABASE_URL", "postgres://localhost/test");
        guard.remove("VIGIL_HEARTBEAT_TIMEOUT_SECS");
        guard.remove("VIGIL_RECOVERY_INTERVAL_SECS");
        guard.remove("VIGIL_TASK_TIMEOUT_SECS");
        guard.remove("VIGIL_MAX_RETRIES");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(120));
        assert_eq!(config.recovery_interval, Duration::from_secs(60));
        assert_eq!(config.task_timeout, Duration::from_secs(1800));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("VIGIL_DATABASE_URL", "sqlite:vigil.db");
        guard.set("VIGIL_HEARTBEAT_TIMEOUT_SECS", "30");
        guard.set("VIGIL_RECOVERY_INTERVAL_SECS", "15");
        guard.set("VIGIL_TASK_TIMEOUT_SECS", "600");
        guard.set("VIGIL_MAX_RETRIES", "5");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite:vigil.db");
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.recovery_interval, Duration::from_secs(15));
        assert_eq!(config.task_timeout, Duration::from_secs(600));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("VIGIL_DATABASE_URL");

        let result = Config::from_env();
        assert!(result.is_err());

        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VIGIL_DATABASE_URL")));
        assert!(err.to_string().contains("VIGIL_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_heartbeat_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("VIGIL_DATABASE_URL", "postgres://localhost/test");
        guard.set("VIGIL_HEARTBEAT_TIMEOUT_SECS", "not_a_number");

        let result = Config::from_env();
        assert!(result.is_err());

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("VIGIL_HEARTBEAT_TIMEOUT_SECS", _)
        ));
    }

    #[test]
    fn test_config_zero_interval_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("VIGIL_DATABASE_URL", "postgres://localhost/test");
        guard.set("VIGIL_RECOVERY_INTERVAL_SECS", "0");

        let result = Config::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_negative_max_retries() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("VIGIL_DATABASE_URL", "postgres://localhost/test");
        guard.set("VIGIL_MAX_RETRIES", "-1");

        let result = Config::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
