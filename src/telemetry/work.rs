//! Span helpers for queue processing and scheduler ticks.

use tracing::Span;
use uuid::Uuid;

use crate::model::Outcome;

/// Start a span for one dequeued item.
///
/// The `queue.outcome` field is declared empty and filled in by
/// [`record_outcome`] once the worker returns.
pub fn start_item_span(key: &str, run_id: &Uuid) -> Span {
    tracing::info_span!(
        "queue.process",
        "queue.key" = key,
        "queue.run_id" = %run_id,
        "queue.outcome" = tracing::field::Empty,
    )
}

/// Record the classified worker outcome on an item span.
pub fn record_outcome(span: &Span, outcome: &Outcome) {
    span.record("queue.outcome", outcome.status());
}

/// Start a span for a single job tick.
pub fn start_tick_span(job: &str, schedule: &str) -> Span {
    tracing::info_span!(
        "scheduler.fire",
        "scheduler.job" = job,
        "scheduler.schedule" = schedule,
    )
}
