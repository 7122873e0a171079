//! Main reconciler for MaintenanceWindow resources
//!
//! Implements the controller pattern using kube-rs runtime. Every change to a
//! MaintenanceWindow runs the approval state machine against a fresh read and
//! writes the resulting status back under optimistic concurrency.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::approval::{self, Decision};
use super::store::{update_status_with_retry, KubeStore, ObjectKey, ObjectStore};
use crate::crd::{ApprovalStatus, MaintenanceWindow};
use crate::error::{Error, Result};

/// Controller name used in metrics and logs
pub const CONTROLLER_NAME: &str = "maintenancewindow";

/// Verdict written by a human or external authorizer: `Approved` or `Denied`
pub const APPROVAL_ANNOTATION: &str = "supervisor.kubeops.dev/approval";
/// Spec generation the verdict in [`APPROVAL_ANNOTATION`] applies to
pub const APPROVED_GENERATION_ANNOTATION: &str = "supervisor.kubeops.dev/approved-generation";

const STATUS_WRITE_ATTEMPTS: u32 = 5;
const PENDING_REQUEUE: Duration = Duration::from_secs(30);
const DECIDED_REQUEUE: Duration = Duration::from_secs(300);

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    /// Approve every valid spec generation without waiting for an annotation
    pub auto_approve: bool,
    /// Restrict the controller to one namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
}

/// What one reconcile did
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub status: ApprovalStatus,
    pub transition: Option<ApprovalStatus>,
    /// Generation of the read the status was evaluated against
    pub generation: i64,
    /// Whether a status write happened
    pub written: bool,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let windows: Api<MaintenanceWindow> = match &state.watch_namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    info!(
        "Starting MaintenanceWindow controller (auto-approve: {})",
        state.auto_approve
    );

    // Verify CRD exists
    match windows.list(&Default::default()).await {
        Ok(_) => info!("MaintenanceWindow CRD is available"),
        Err(e) => {
            error!(
                "MaintenanceWindow CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "MaintenanceWindow CRD not installed".to_string(),
            ));
        }
    }

    Controller::new(windows, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<MaintenanceWindow>, ctx: Arc<ControllerState>) -> Result<Action> {
    let started = std::time::Instant::now();
    let store = KubeStore::<MaintenanceWindow>::namespaced(ctx.client.clone());

    let result = reconcile_window(&store, &obj, ctx.auto_approve, Utc::now()).await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        CONTROLLER_NAME,
        started.elapsed().as_secs_f64(),
    );
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    let outcome = result?;
    Ok(Action::requeue(requeue_after(outcome.status)))
}

/// Run the approval state machine for one window and persist the result
///
/// The spec is validated before anything is evaluated; an invalid spec is
/// reported as [`Error::ValidationError`] and its status is left untouched.
pub async fn reconcile_window<S>(
    store: &S,
    obj: &MaintenanceWindow,
    auto_approve: bool,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome>
where
    S: ObjectStore<MaintenanceWindow> + ?Sized,
{
    obj.spec.validate().map_err(Error::ValidationError)?;

    let key = ObjectKey::of(obj);
    let mut status = obj.approval();
    let mut transition = None;
    let mut evaluated_generation = obj.generation();

    let written = update_status_with_retry(store, &key, STATUS_WRITE_ATTEMPTS, |current| {
        // The fresh read may carry a newer spec than the event that triggered us.
        current.spec.validate().map_err(Error::ValidationError)?;

        let decision = decision_for(current, auto_approve);
        let previous = current.status.clone().unwrap_or_default();
        evaluated_generation = current.generation();
        let eval = approval::evaluate(&previous, evaluated_generation, decision.as_ref(), now)?;

        status = eval.status.status;
        transition = eval.transition;

        if current.status.is_some() && !eval.changed(&previous) {
            return Ok(None);
        }
        let mut updated = current.clone();
        updated.status = Some(eval.status);
        Ok(Some(updated))
    })
    .await?;

    if let Some(entered) = transition {
        info!(
            "MaintenanceWindow {} generation {} is now {}",
            key, evaluated_generation, entered
        );
        #[cfg(feature = "metrics")]
        super::metrics::inc_approval_transition(&key.namespace, &entered.to_string());
    }

    Ok(ReconcileOutcome {
        status,
        transition,
        generation: evaluated_generation,
        written: written.is_some(),
    })
}

/// The decision that applies to `mw`, if any
///
/// An explicit verdict annotation wins over the auto-approve policy. A
/// verdict without a readable generation is ignored, since it cannot be tied
/// to the spec it was made for.
pub fn decision_for(mw: &MaintenanceWindow, auto_approve: bool) -> Option<Decision> {
    let annotations = mw.annotations();

    if let Some(verdict) = annotations.get(APPROVAL_ANNOTATION) {
        let generation = match annotations
            .get(APPROVED_GENERATION_ANNOTATION)
            .map(|g| g.trim().parse::<i64>())
        {
            Some(Ok(generation)) if generation >= 0 => generation,
            Some(Ok(generation)) => {
                warn!(
                    "Ignoring {} on {}: negative {} {}",
                    APPROVAL_ANNOTATION,
                    mw.name_any(),
                    APPROVED_GENERATION_ANNOTATION,
                    generation
                );
                return None;
            }
            Some(Err(e)) => {
                warn!(
                    "Ignoring {} on {}: unreadable {}: {}",
                    APPROVAL_ANNOTATION,
                    mw.name_any(),
                    APPROVED_GENERATION_ANNOTATION,
                    e
                );
                return None;
            }
            None => {
                warn!(
                    "Ignoring {} on {}: {} is missing",
                    APPROVAL_ANNOTATION,
                    mw.name_any(),
                    APPROVED_GENERATION_ANNOTATION
                );
                return None;
            }
        };

        let message = format!("{verdict} via annotation for generation {generation}");
        return match verdict.trim() {
            v if v.eq_ignore_ascii_case("approved") => {
                Some(Decision::approve(generation, "ApprovedByAnnotation", message))
            }
            v if v.eq_ignore_ascii_case("denied") => {
                Some(Decision::deny(generation, "DeniedByAnnotation", message))
            }
            other => {
                warn!(
                    "Ignoring unknown verdict {:?} in {} on {}",
                    other,
                    APPROVAL_ANNOTATION,
                    mw.name_any()
                );
                None
            }
        };
    }

    auto_approve.then(|| {
        Decision::approve(
            mw.generation(),
            "AutoApproved",
            "approved by supervisor policy",
        )
    })
}

/// Pending windows are revisited sooner than decided ones
pub fn requeue_after(status: ApprovalStatus) -> Duration {
    match status {
        ApprovalStatus::Pending => PENDING_REQUEUE,
        ApprovalStatus::Approved | ApprovalStatus::Denied => DECIDED_REQUEUE,
    }
}

fn error_policy(window: Arc<MaintenanceWindow>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(
        "Reconciliation error for {}: {:?}",
        window.name_any(),
        error
    );

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(CONTROLLER_NAME, error.kind());

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
