//! Approval state machine for MaintenanceWindow status
//!
//! `Pending -> {Approved, Denied}`. Both outcomes are terminal for the spec
//! generation they were made against; a generation bump resets the status to
//! Pending until a decision for the new generation arrives.
//!
//! Evaluation is a pure function of the previous status, the current
//! generation, the decision and the clock, so a caller that loses an
//! optimistic-concurrency race can simply re-read and evaluate again.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::conditions::{
    clear_condition, set_condition, CONDITION_STATUS_TRUE, CONDITION_TYPE_APPROVED,
    CONDITION_TYPE_DENIED, CONDITION_TYPE_SPEC_CHANGED,
};
use crate::crd::{ApprovalStatus, MaintenanceWindowStatus, SpecValidationError};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Deny,
}

/// An authorizer's verdict on one spec generation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// Generation the authorizer looked at
    pub generation: i64,
    pub reason: String,
    pub message: String,
}

impl Decision {
    pub fn approve(generation: i64, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Approve,
            generation,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn deny(generation: i64, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            generation,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Result of one evaluation
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub status: MaintenanceWindowStatus,
    /// Approval state entered during this evaluation, if it moved
    pub transition: Option<ApprovalStatus>,
}

impl Evaluation {
    /// Whether the status differs from the one evaluated
    pub fn changed(&self, previous: &MaintenanceWindowStatus) -> bool {
        self.status != *previous
    }
}

/// Compute the next status
///
/// Fails only for malformed generations: negative values, or a current
/// generation older than the one already observed.
pub fn evaluate(
    previous: &MaintenanceWindowStatus,
    current_generation: i64,
    decision: Option<&Decision>,
    now: DateTime<Utc>,
) -> Result<Evaluation> {
    validate_generations(previous, current_generation, decision)?;

    let mut status = previous.clone();
    let mut transition = None;

    if current_generation != status.observed_generation {
        let message = format!(
            "generation {} awaits a decision (last evaluated generation {})",
            current_generation, status.observed_generation
        );
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_SPEC_CHANGED,
            CONDITION_STATUS_TRUE,
            "GenerationChanged",
            &message,
            Some(current_generation),
            now,
        );
        for verdict_type in [CONDITION_TYPE_APPROVED, CONDITION_TYPE_DENIED] {
            clear_condition(
                &mut status.conditions,
                verdict_type,
                "SpecChanged",
                "spec changed since this decision",
                now,
            );
        }
        if status.status != ApprovalStatus::Pending {
            status.status = ApprovalStatus::Pending;
            transition = Some(ApprovalStatus::Pending);
        }
    }

    let Some(decision) = decision else {
        return Ok(Evaluation { status, transition });
    };

    if decision.generation != current_generation {
        debug!(
            decision_generation = decision.generation,
            current_generation, "Ignoring decision made for another generation"
        );
        return Ok(Evaluation { status, transition });
    }

    if status.status != ApprovalStatus::Pending {
        // Already decided for this generation.
        return Ok(Evaluation { status, transition });
    }

    let (new_status, condition_type, opposite) = match decision.verdict {
        Verdict::Approve => (
            ApprovalStatus::Approved,
            CONDITION_TYPE_APPROVED,
            CONDITION_TYPE_DENIED,
        ),
        Verdict::Deny => (
            ApprovalStatus::Denied,
            CONDITION_TYPE_DENIED,
            CONDITION_TYPE_APPROVED,
        ),
    };

    set_condition(
        &mut status.conditions,
        condition_type,
        CONDITION_STATUS_TRUE,
        &decision.reason,
        &decision.message,
        Some(current_generation),
        now,
    );
    clear_condition(
        &mut status.conditions,
        opposite,
        "Superseded",
        &format!("generation {current_generation} was {new_status}"),
        now,
    );
    clear_condition(
        &mut status.conditions,
        CONDITION_TYPE_SPEC_CHANGED,
        "Decided",
        &format!("generation {current_generation} was {new_status}"),
        now,
    );

    status.status = new_status;
    status.observed_generation = current_generation;

    Ok(Evaluation {
        status,
        transition: Some(new_status),
    })
}

fn validate_generations(
    previous: &MaintenanceWindowStatus,
    current_generation: i64,
    decision: Option<&Decision>,
) -> Result<()> {
    let mut errors = Vec::new();

    if current_generation < 0 {
        errors.push(SpecValidationError::new(
            "metadata.generation",
            format!("generation {current_generation} is negative"),
            "Generations are assigned by the API server; re-read the object.",
        ));
    }
    if previous.observed_generation < 0 {
        errors.push(SpecValidationError::new(
            "status.observedGeneration",
            format!(
                "observed generation {} is negative",
                previous.observed_generation
            ),
            "Reset status.observedGeneration to 0 so the window is re-evaluated.",
        ));
    }
    if current_generation < previous.observed_generation {
        errors.push(SpecValidationError::new(
            "metadata.generation",
            format!(
                "generation {} is older than observed generation {}",
                current_generation, previous.observed_generation
            ),
            "Evaluate against a fresh read of the object.",
        ));
    }
    if let Some(d) = decision {
        if d.generation < 0 {
            errors.push(SpecValidationError::new(
                "decision.generation",
                format!("decision generation {} is negative", d.generation),
                "Attach the generation the decision was made against.",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::ValidationError(errors))
    }
}
