//! Metric instrument factories for qued.
//!
//! Instruments come from the `"qued"` meter on the global `MeterProvider`.
//! Until [`super::init_telemetry`] installs an exporting provider they are
//! no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("qued")
}

/// Counter: queue operations.
/// Labels: `queue`, `operation` ("enqueue" | "dequeue" | "dequeue_empty" |
/// "retry" | "dead_letter" | "drain" | "replay" | "quarantine").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("qued.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: envelopes routed to a dead-letter channel.
/// Labels: `queue`.
pub fn dead_lettered() -> Counter<u64> {
    meter()
        .u64_counter("qued.queue.dead_lettered")
        .with_description("Envelopes parked on the dead-letter channel")
        .build()
}

/// Histogram: handler time per envelope in milliseconds.
/// Labels: `queue`, `disposition` ("done" | "retry" | "dead_letter").
pub fn handle_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("qued.worker.duration_ms")
        .with_description("Time spent handling one envelope")
        .with_unit("ms")
        .build()
}
