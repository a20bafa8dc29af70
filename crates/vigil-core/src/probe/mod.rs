// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service probes and the probe registry.
//!
//! A probe performs one observation of a monitored endpoint and returns a
//! report. Probes are infallible at the type level: transport failures are
//! embedded in the report under the `error` key, where the condition
//! evaluator treats them as never-matching.

pub mod database;
pub mod http;

pub use self::database::DatabaseProbe;
pub use self::http::HttpProbe;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

/// Outcome of a single probe observation.
///
/// The payload is a JSON object whose keys depend on the probe kind
/// (`status_code`, `body`, `json` for HTTP; `row_count`, `data` for
/// database probes; `response_time_seconds` for both). A payload carrying
/// an `error` key marks a failed observation.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    payload: Value,
}

impl ProbeReport {
    /// Wrap a probe payload.
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// Build an error report from a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            payload: json!({ "error": message.into() }),
        }
    }

    /// True when the observation failed.
    pub fn is_error(&self) -> bool {
        self.payload.get("error").is_some()
    }

    /// The raw payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Serialize the payload for storage in the task `result` column.
    pub fn to_json(&self) -> String {
        self.payload.to_string()
    }
}

/// A single-observation probe against a monitored endpoint.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Observe the endpoint once.
    ///
    /// Never fails: transport and protocol errors come back as error
    /// reports so one bad observation cannot crash a check cycle.
    async fn check(&self, url: &str) -> ProbeReport;
}

/// Maps service names to probe implementations.
///
/// Lookup is case-insensitive. Unknown service names fall back to the HTTP
/// probe, so a task for an unregistered service degrades to a plain HTTP
/// check instead of being rejected.
#[derive(Clone)]
pub struct ProbeRegistry {
    probes: HashMap<String, Arc<dyn Probe>>,
    fallback: Arc<dyn Probe>,
}

impl ProbeRegistry {
    /// Create an empty registry with an explicit fallback probe.
    pub fn new(fallback: Arc<dyn Probe>) -> Self {
        Self {
            probes: HashMap::new(),
            fallback,
        }
    }

    /// Registry with the built-in probes.
    ///
    /// `http` and `https` map to [`HttpProbe`]; `database`, `mysql`, and
    /// `postgresql` map to [`DatabaseProbe`]; anything else falls back to
    /// HTTP.
    pub fn with_defaults() -> Self {
        let http: Arc<dyn Probe> = Arc::new(HttpProbe::new());
        let db: Arc<dyn Probe> = Arc::new(DatabaseProbe::new());

        let mut registry = Self::new(http.clone());
        registry.register("http", http.clone());
        registry.register("https", http);
        registry.register("database", db.clone());
        registry.register("mysql", db.clone());
        registry.register("postgresql", db);
        registry
    }

    /// Register a probe for a service name, replacing any previous entry.
    pub fn register(&mut self, service_name: &str, probe: Arc<dyn Probe>) {
        self.probes.insert(service_name.to_lowercase(), probe);
    }

    /// Resolve the probe for a service name.
    pub fn resolve(&self, service_name: &str) -> Arc<dyn Probe> {
        self.probes
            .get(&service_name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
