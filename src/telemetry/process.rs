//! Span helpers for envelope processing.

use crate::model::Envelope;
use tracing::Span;

/// Start a span covering one handler invocation.
///
/// `queue.disposition` is declared empty and filled in by
/// [`record_disposition`].
pub fn start_process_span<T>(queue: &str, envelope: &Envelope<T>) -> Span {
    tracing::info_span!(
        "queue.process",
        "queue.name" = queue,
        "message.id" = %envelope.id,
        "message.type" = envelope.kind().unwrap_or(""),
        "message.attempts" = envelope.attempts,
        "queue.disposition" = tracing::field::Empty,
    )
}

/// Record how the handler disposed of the envelope.
pub fn record_disposition(span: &Span, disposition: &str) {
    span.record("queue.disposition", disposition);
    span.in_scope(|| {
        tracing::debug!(disposition, "handled");
    });
}
