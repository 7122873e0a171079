//! Joint gate over window matching and approval
//!
//! A disruptive operation may start only inside a window whose current spec
//! generation has been approved.

use chrono::{DateTime, TimeZone};
use kube::ResourceExt;
use serde::Serialize;

use super::window::{explicit_match, WindowSet};
use crate::crd::{ApprovalStatus, MaintenanceWindow};
use crate::error::Result;

/// Whether an operation may run
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum GateDecision {
    /// Allowed now by the named window
    Proceed { window: String },
    /// Not now, but an approval or a later instant may allow it
    Later { reason: String },
    /// No window can allow it without a spec change
    Never { reason: String },
}

impl GateDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, GateDecision::Proceed { .. })
    }
}

/// Approval state as it applies to the current generation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Standing {
    Approved,
    Denied,
    /// Pending, or decided for an older generation
    Undecided,
}

fn standing(mw: &MaintenanceWindow) -> Standing {
    if !mw.is_status_current() {
        return Standing::Undecided;
    }
    match mw.approval() {
        ApprovalStatus::Approved => Standing::Approved,
        ApprovalStatus::Denied => Standing::Denied,
        ApprovalStatus::Pending => Standing::Undecided,
    }
}

/// Decide whether an operation may run at `instant`
///
/// With `request` set, only that window is considered. Otherwise all approved
/// windows are aggregated, the default window catching what nothing else
/// claims. Fails only when the approved windows carry more than one default.
pub fn gate<Tz: TimeZone>(
    windows: &[MaintenanceWindow],
    request: Option<&str>,
    instant: &DateTime<Tz>,
) -> Result<GateDecision> {
    match request {
        Some(name) => Ok(gate_named(windows, name, instant)),
        None => gate_any(windows, instant),
    }
}

fn gate_named<Tz: TimeZone>(
    windows: &[MaintenanceWindow],
    name: &str,
    instant: &DateTime<Tz>,
) -> GateDecision {
    let Some(mw) = windows.iter().find(|mw| mw.name_any() == name) else {
        return GateDecision::Never {
            reason: format!("window {name} does not exist"),
        };
    };

    match standing(mw) {
        Standing::Denied => GateDecision::Never {
            reason: format!(
                "window {name} generation {} was denied",
                mw.generation()
            ),
        },
        Standing::Undecided => GateDecision::Later {
            reason: format!(
                "window {name} generation {} awaits approval",
                mw.generation()
            ),
        },
        Standing::Approved if explicit_match(&mw.spec, instant).is_some() => {
            GateDecision::Proceed {
                window: name.to_string(),
            }
        }
        Standing::Approved => GateDecision::Later {
            reason: format!("outside window {name}"),
        },
    }
}

fn gate_any<Tz: TimeZone>(
    windows: &[MaintenanceWindow],
    instant: &DateTime<Tz>,
) -> Result<GateDecision> {
    let names: Vec<String> = windows.iter().map(|mw| mw.name_any()).collect();
    let standings: Vec<Standing> = windows.iter().map(standing).collect();

    let approved = WindowSet::new(
        names
            .iter()
            .zip(windows)
            .zip(&standings)
            .filter(|(_, s)| **s == Standing::Approved)
            .map(|((name, mw), _)| (name.as_str(), &mw.spec)),
    )?;

    if let Some(hit) = approved.evaluate(instant) {
        return Ok(GateDecision::Proceed {
            window: hit.name.to_string(),
        });
    }

    if standings.iter().any(|s| *s != Standing::Denied) {
        let undecided = standings
            .iter()
            .filter(|s| **s == Standing::Undecided)
            .count();
        return Ok(GateDecision::Later {
            reason: format!(
                "no approved window covers this instant ({undecided} window(s) await approval)"
            ),
        });
    }

    Ok(GateDecision::Never {
        reason: if windows.is_empty() {
            "no maintenance windows defined".to_string()
        } else {
            "every maintenance window was denied".to_string()
        },
    })
}
