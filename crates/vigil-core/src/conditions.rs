// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Success/failure condition specs and their evaluator.
//!
//! A condition spec is a structured predicate evaluated against a probe
//! report. All predicates present in a spec must hold for the spec to match.
//! Everything fails closed: an error report, a missing field path, a
//! malformed spec, or a spec with no predicates at all never matches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::probe::ProbeReport;

/// Expected status code: a single code or a one-of list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusCodeMatch {
    /// Exactly this status code.
    One(u16),
    /// Any of these status codes.
    AnyOf(Vec<u16>),
}

impl StatusCodeMatch {
    fn matches(&self, code: u64) -> bool {
        match self {
            Self::One(expected) => u64::from(*expected) == code,
            Self::AnyOf(expected) => expected.iter().any(|c| u64::from(*c) == code),
        }
    }
}

/// Structured predicate over a probe report.
///
/// Unknown keys are ignored so specs written for a newer version still parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionSpec {
    /// Match on the HTTP status code field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<StatusCodeMatch>,
    /// Dotted-path equality checks inside the parsed JSON body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_fields: Option<BTreeMap<String, Value>>,
    /// Substring containment on the raw response body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,
    /// Minimum number of rows returned by a database probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_row_count: Option<i64>,
    /// Maximum number of rows returned by a database probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_row_count: Option<i64>,
    /// Maximum query response time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_time: Option<f64>,
    /// Dotted-path equality checks against the first returned row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_fields: Option<BTreeMap<String, Value>>,
}

impl ConditionSpec {
    /// Parse a stored JSON spec.
    ///
    /// Returns `None` for absent, malformed, or empty specs; such specs
    /// never match. Parse failures are logged, never propagated.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw?;
        let spec: Self = match serde_json::from_str(raw) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed condition spec");
                return None;
            }
        };
        if spec.is_empty() { None } else { Some(spec) }
    }

    /// True when no predicate is present.
    pub fn is_empty(&self) -> bool {
        self.status_code.is_none()
            && self.json_fields.is_none()
            && self.body_contains.is_none()
            && self.min_row_count.is_none()
            && self.max_row_count.is_none()
            && self.max_response_time.is_none()
            && self.data_fields.is_none()
    }

    /// Evaluate this spec against a probe report.
    pub fn matches(&self, report: &ProbeReport) -> bool {
        if report.is_error() || self.is_empty() {
            return false;
        }
        let payload = report.payload();

        if let Some(ref expected) = self.status_code {
            match payload.get("status_code").and_then(Value::as_u64) {
                Some(code) if expected.matches(code) => {}
                _ => return false,
            }
        }

        if let Some(ref fields) = self.json_fields {
            let Some(json) = payload.get("json") else {
                return false;
            };
            for (path, expected) in fields {
                if lookup_path(json, path) != Some(expected) {
                    return false;
                }
            }
        }

        if let Some(ref needle) = self.body_contains {
            match payload.get("body").and_then(Value::as_str) {
                Some(body) if body.contains(needle.as_str()) => {}
                _ => return false,
            }
        }

        let row_count = payload.get("row_count").and_then(Value::as_i64);
        if let Some(min) = self.min_row_count
            && row_count.unwrap_or(0) < min
        {
            return false;
        }
        if let Some(max) = self.max_row_count
            && row_count.unwrap_or(0) > max
        {
            return false;
        }

        if let Some(max) = self.max_response_time {
            let elapsed = payload
                .get("response_time_seconds")
                .and_then(Value::as_f64)
                .unwrap_or(f64::INFINITY);
            if elapsed > max {
                return false;
            }
        }

        if let Some(ref fields) = self.data_fields {
            let Some(first_row) = payload
                .get("data")
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
            else {
                return false;
            };
            for (path, expected) in fields {
                if lookup_path(first_row, path) != Some(expected) {
                    return false;
                }
            }
        }

        true
    }
}

/// Evaluate a stored JSON spec against a probe report in one step.
pub fn matches_spec(report: &ProbeReport, raw: Option<&str>) -> bool {
    ConditionSpec::parse(raw).is_some_and(|spec| spec.matches(report))
}

/// Traverse a dotted field path inside a JSON value.
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for key in path.split('.') {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}
