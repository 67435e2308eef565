//! Metric instrument factories for refreshq.
//!
//! Instruments come from the [`SCOPE`](super::SCOPE) meter on the global
//! provider, so they record into a no-op until telemetry is initialized.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for refreshq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter(super::SCOPE)
}

/// Counter: create_event calls.
/// Labels: `event_type`, `result` ("ok" | "duplicate" | "error").
pub fn events_created() -> Counter<u64> {
    meter()
        .u64_counter("refreshq.events.created")
        .with_description("Number of parsing event create attempts")
        .build()
}

/// Counter: event status changes.
/// Labels: `from`, `to`.
pub fn status_changes() -> Counter<u64> {
    meter()
        .u64_counter("refreshq.events.status_changes")
        .with_description("Number of parsing event status changes")
        .build()
}

/// Counter: events acquired with no registered worker.
/// Labels: `event_type`.
pub fn events_unroutable() -> Counter<u64> {
    meter()
        .u64_counter("refreshq.events.unroutable")
        .with_description("Parsing events with no matching worker")
        .build()
}

/// Counter: per-target outcomes reported by workers.
/// Labels: `event_type`, `outcome` ("success" | "failed" | "skipped").
pub fn worker_targets() -> Counter<u64> {
    meter()
        .u64_counter("refreshq.worker.targets")
        .with_description("Targets processed by workers")
        .build()
}

/// Counter: poll ticks skipped because a cycle was still running.
pub fn poll_ticks_skipped() -> Counter<u64> {
    meter()
        .u64_counter("refreshq.scheduler.poll_skipped")
        .with_description("Poll ticks skipped by the single-flight guard")
        .build()
}

/// Histogram: dispatch duration in milliseconds.
/// Labels: `event_type`, `status`.
pub fn dispatch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("refreshq.dispatch.duration_ms")
        .with_description("Worker dispatch duration in milliseconds")
        .with_unit("ms")
        .build()
}
