// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP endpoint probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{Probe, ProbeReport};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Probes an endpoint with a single GET request.
///
/// The report carries `status_code`, `headers`, `body`,
/// `response_time_seconds`, and, for `application/json` responses that
/// parse, the parsed body under `json`. Non-2xx responses are still normal
/// reports; only transport failures produce error reports.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// HTTP probe with the default 10 second request timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// HTTP probe with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, url: &str) -> ProbeReport {
        let started = Instant::now();

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                debug!(url, "HTTP probe timed out");
                return ProbeReport::error("HTTP request timeout");
            }
            Err(e) => {
                debug!(url, error = %e, "HTTP probe failed");
                return ProbeReport::error(format!("HTTP request failed: {e}"));
            }
        };

        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        let mut headers = Map::new();
        for (name, value) in response.headers() {
            headers.insert(
                name.as_str().to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            );
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return ProbeReport::error(format!("HTTP request failed: {e}"));
            }
        };
        let elapsed = started.elapsed().as_secs_f64();

        let parsed = if is_json {
            serde_json::from_str::<Value>(&body).ok()
        } else {
            None
        };

        let mut payload = json!({
            "status_code": status,
            "headers": Value::Object(headers),
            "body": body,
            "response_time_seconds": elapsed,
            "timestamp": Utc::now().to_rfc3339(),
        });

        if let Some(parsed) = parsed
            && let Some(obj) = payload.as_object_mut()
        {
            obj.insert("json".to_string(), parsed);
        }

        ProbeReport::new(payload)
    }
}
