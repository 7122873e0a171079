//! Request and response bodies for the REST API

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::controller::{matches, GateDecision};
use crate::crd::{ApprovalStatus, MaintenanceWindow};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    pub name: String,
    pub namespace: String,
    pub is_default: bool,
    pub status: ApprovalStatus,
    pub generation: i64,
    pub observed_generation: i64,
    /// Whether the status was computed for the current generation
    pub current: bool,
    /// Whether the spec covers the moment the list was served
    pub open_now: bool,
}

impl WindowSummary {
    pub fn from_window(mw: &MaintenanceWindow, now: &DateTime<Utc>) -> Self {
        Self {
            name: mw.name_any(),
            namespace: mw.namespace().unwrap_or_default(),
            is_default: mw.spec.is_default,
            status: mw.approval(),
            generation: mw.generation(),
            observed_generation: mw
                .status
                .as_ref()
                .map(|s| s.observed_generation)
                .unwrap_or(0),
            current: mw.is_status_current(),
            open_now: matches(&mw.spec, now),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WindowListResponse {
    pub items: Vec<WindowSummary>,
    pub total: usize,
}

/// Query string of the gate endpoint
#[derive(Debug, Default, Deserialize)]
pub struct GateQuery {
    /// Restrict the decision to one window
    pub window: Option<String>,
    /// RFC 3339 instant to evaluate; its offset selects the time zone. Defaults to now (UTC).
    pub at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Serialize)]
pub struct GateResponse {
    pub namespace: String,
    pub at: String,
    #[serde(flatten)]
    pub decision: GateDecision,
}

impl GateResponse {
    pub fn new(namespace: &str, at: &DateTime<FixedOffset>, decision: GateDecision) -> Self {
        Self {
            namespace: namespace.to_string(),
            at: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            decision,
        }
    }
}
