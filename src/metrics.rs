//! # Dispatch Metrics
//!
//! OpenTelemetry instruments for dispatch outcomes and poller cycles. They
//! report through whatever meter provider the process installed; with none
//! installed they are no-ops.
//!
//! ## Usage
//!
//! ```rust
//! use fleet_lifecycle::metrics;
//! use opentelemetry::KeyValue;
//!
//! metrics::dispatch_success_total().add(
//!     1,
//!     &[
//!         KeyValue::new("operation", "build"),
//!         KeyValue::new("kind", "virtual_machine"),
//!     ],
//! );
//! ```

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

use crate::state_machine::{LifecycleOperation, ResourceKind};

/// Lazy-initialized meter for dispatcher metrics
static LIFECYCLE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    LIFECYCLE_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("fleet-lifecycle"))
}

// Counters

/// Operations that reached their success state
///
/// Labels:
/// - operation, kind
pub fn dispatch_success_total() -> Counter<u64> {
    meter()
        .u64_counter("lifecycle.dispatch.success.total")
        .with_description("Total number of lifecycle operations that succeeded")
        .build()
}

/// Operations that failed or could not start because the resource was missing
///
/// Labels:
/// - operation, kind, reason
pub fn dispatch_failure_total() -> Counter<u64> {
    meter()
        .u64_counter("lifecycle.dispatch.failure.total")
        .with_description("Total number of lifecycle operations that failed")
        .build()
}

/// Dispatches that returned without acting (stale state, claim lost)
///
/// Labels:
/// - operation, kind, reason
pub fn dispatch_skipped_total() -> Counter<u64> {
    meter()
        .u64_counter("lifecycle.dispatch.skipped.total")
        .with_description("Total number of dispatches that were no-ops")
        .build()
}

/// Dispatches postponed until a dependency is ready
///
/// Labels:
/// - operation, kind, reason
pub fn dispatch_deferred_total() -> Counter<u64> {
    meter()
        .u64_counter("lifecycle.dispatch.deferred.total")
        .with_description("Total number of dispatches deferred for dependencies")
        .build()
}

/// Poller cycles
///
/// Labels:
/// - result: ok, error
pub fn poller_cycles_total() -> Counter<u64> {
    meter()
        .u64_counter("lifecycle.poller.cycles.total")
        .with_description("Total number of poller cycles")
        .build()
}

// Histograms

/// Wall time of one dispatch in milliseconds
///
/// Labels:
/// - operation, kind
pub fn dispatch_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("lifecycle.dispatch.duration")
        .with_description("Duration of lifecycle dispatches")
        .with_unit("ms")
        .build()
}

/// Standard labels for a dispatch
pub fn dispatch_labels(operation: LifecycleOperation, kind: ResourceKind) -> Vec<KeyValue> {
    vec![
        KeyValue::new("operation", operation.to_string()),
        KeyValue::new("kind", kind.to_string()),
    ]
}

/// Dispatch labels plus a reason
pub fn labels_with_reason(
    operation: LifecycleOperation,
    kind: ResourceKind,
    reason: &'static str,
) -> Vec<KeyValue> {
    let mut labels = dispatch_labels(operation, kind);
    labels.push(KeyValue::new("reason", reason));
    labels
}
