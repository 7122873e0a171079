//! Prometheus metrics for the maintenance supervisor
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `maintenance_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `maintenance_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `maintenance_approval_transitions_total` (counter): approval state changes labeled by namespace and target status.
//! - `maintenance_poll_outcomes_total` (counter): finished waits labeled by outcome.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "maintenancewindow"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind/category, e.g. "kube", "validation", "conflict"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    pub namespace: String,
    /// Approval status entered: Pending, Approved or Denied
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PollLabels {
    /// succeeded, timed_out, cancelled or failed
    pub outcome: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking approval state transitions
pub static APPROVAL_TRANSITIONS_TOTAL: Lazy<Family<TransitionLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking how waits ended
pub static POLL_OUTCOMES_TOTAL: Lazy<Family<PollLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "maintenance_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "maintenance_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "maintenance_approval_transitions",
        "Total number of MaintenanceWindow approval state transitions",
        APPROVAL_TRANSITIONS_TOTAL.clone(),
    );
    registry.register(
        "maintenance_poll_outcomes",
        "Total number of finished resource waits by outcome",
        POLL_OUTCOMES_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_approval_transition(namespace: &str, status: &str) {
    let labels = TransitionLabels {
        namespace: namespace.to_string(),
        status: status.to_string(),
    };
    APPROVAL_TRANSITIONS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_poll_outcome(outcome: &str) {
    let labels = PollLabels {
        outcome: outcome.to_string(),
    };
    POLL_OUTCOMES_TOTAL.get_or_create(&labels).inc();
}
