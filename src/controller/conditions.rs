//! Condition management helpers following Kubernetes API conventions

use chrono::{DateTime, SecondsFormat, Utc};

use crate::crd::Condition;

/// Condition types recorded by the approval state machine
pub const CONDITION_TYPE_APPROVED: &str = "Approved";
pub const CONDITION_TYPE_DENIED: &str = "Denied";
pub const CONDITION_TYPE_SPEC_CHANGED: &str = "SpecChanged";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Update or add a condition to the conditions list
///
/// At most one condition per type is kept. An existing entry is updated in place;
/// its transition time only moves when the status changes. Returns whether
/// anything in the list changed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) -> bool {
    let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let status_changed = existing.status != status;
        let changed = status_changed
            || existing.reason != reason
            || existing.message != message
            || existing.observed_generation != observed_generation;

        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.observed_generation = observed_generation;

        if status_changed {
            existing.last_transition_time = now;
        }
        changed
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation,
        });
        true
    }
}

/// Flip an existing condition to False; absent conditions are left absent
pub fn clear_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> bool {
    match find_condition(conditions, type_) {
        Some(c) if c.status != CONDITION_STATUS_FALSE => {
            let generation = c.observed_generation;
            set_condition(
                conditions,
                type_,
                CONDITION_STATUS_FALSE,
                reason,
                message,
                generation,
                now,
            )
        }
        _ => false,
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}
