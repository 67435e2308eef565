//! Dispatch span helpers.
//!
//! One span covers an event from acquisition to its final status.

use tracing::Span;

use crate::model::{EventStatus, ParsingEvent};

/// Start a span for dispatching one event.
///
/// The `event.status` field is declared empty and filled by
/// [`record_status`].
pub fn start_dispatch_span(event: &ParsingEvent) -> Span {
    tracing::info_span!(
        "event.dispatch",
        "event.id" = %event.id,
        "event.type" = event.event_type.as_str(),
        "event.request" = event.event_message.request_type().as_str(),
        "event.status" = tracing::field::Empty,
    )
}

/// Record the status an event ended in.
pub fn record_status(span: &Span, from: EventStatus, to: EventStatus) {
    span.record("event.status", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "status_change");
    });
}
