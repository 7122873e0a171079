//! Controller module for MaintenanceWindow supervision
//! This module contains the window matcher, the approval state machine, the
//! resource poller and the controller loop that ties them to the cluster.

pub mod approval;
pub mod conditions;
pub mod gate;
pub mod lifecycle;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod poller;
mod reconciler;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
pub mod window;

pub use approval::{evaluate, Decision, Evaluation, Verdict};
pub use gate::{gate, GateDecision};
pub use lifecycle::{
    create_and_wait, delete_and_wait, phase, phase_is, status_field, PHASE_READY,
};
pub use poller::{
    cancel_pair, poll_until, wait_for, wait_for_deletion, CancelHandle, CancelToken, PollOptions,
    PollOutcome,
};
pub use reconciler::{
    decision_for, reconcile_window, requeue_after, run_controller, ControllerState,
    ReconcileOutcome, APPROVAL_ANNOTATION, APPROVED_GENERATION_ANNOTATION, CONTROLLER_NAME,
};
pub use store::{update_status_with_retry, KubeStore, ObjectKey, ObjectStore};
pub use window::{explicit_match, match_source, matches, MatchSource, WindowMatch, WindowSet};
