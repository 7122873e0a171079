//! MaintenanceWindow Custom Resource Definition
//!
//! A MaintenanceWindow describes when disruptive database operations may run:
//! recurring weekly time slots (`days`) and absolute calendar ranges (`dates`).
//! Its status records whether an authorizer approved the current spec generation.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApprovalStatus, Condition, DateWindow, DayOfWeek, TimeWindow};

/// Structured validation error for `MaintenanceWindowSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "supervisor.kubeops.dev",
    version = "v1alpha1",
    kind = "MaintenanceWindow",
    namespaced,
    status = "MaintenanceWindowStatus",
    shortname = "mw",
    printcolumn = r#"{"name":"Default","type":"boolean","jsonPath":".spec.isDefault"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindowSpec {
    /// Fallback window applied when no other window claims an instant
    #[serde(default)]
    pub is_default: bool,

    /// Recurring weekly allowances, keyed by day
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub days: BTreeMap<DayOfWeek, Vec<TimeWindow>>,

    /// One-off calendar ranges, evaluated before `days`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dates: Vec<DateWindow>,
}

impl MaintenanceWindowSpec {
    /// Validate the window definitions
    ///
    /// Every violation is reported at once. Time windows must not cross midnight:
    /// a slot like 22:00-02:00 has to be split into two entries on adjacent days.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        for (day, windows) in &self.days {
            for (i, window) in windows.iter().enumerate() {
                if window.start > window.end {
                    errors.push(SpecValidationError::new(
                        format!("spec.days.{day}[{i}]"),
                        format!(
                            "time window start {} is after end {}",
                            window.start, window.end
                        ),
                        "Windows cannot cross midnight; split it into one entry ending at 23:59:59 and one starting at 00:00:00 on the next day.",
                    ));
                }
            }
        }

        for (i, window) in self.dates.iter().enumerate() {
            if window.start > window.end {
                errors.push(SpecValidationError::new(
                    format!("spec.dates[{i}]"),
                    format!(
                        "date window start {} is after end {}",
                        window.start.to_rfc3339(),
                        window.end.to_rfc3339()
                    ),
                    "Set spec.dates[].start to a timestamp at or before spec.dates[].end.",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Observed state of a MaintenanceWindow, owned by the approval state machine
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindowStatus {
    /// Current approval state
    #[serde(default)]
    pub status: ApprovalStatus,

    /// Most recent spec generation the state machine evaluated
    #[serde(default)]
    pub observed_generation: i64,

    /// Transition history, at most one entry per condition type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl MaintenanceWindow {
    /// Current spec generation as reported by the API server
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    /// Approval status, treating a missing status as Pending
    pub fn approval(&self) -> ApprovalStatus {
        self.status
            .as_ref()
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// True when the status reflects the current spec generation
    pub fn is_status_current(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.observed_generation == self.generation())
            .unwrap_or(false)
    }
}
