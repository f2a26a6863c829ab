use ulid::Ulid;

use crate::model::*;

use super::error::Rejection;
use super::store::BookingStore;
use super::EngineError;

/// Turn caller-supplied bounds into a span, rejecting empty or inverted
/// intervals and timestamps outside the supported range.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    let span = Span::try_new(start, end).ok_or(Rejection::EmptySpan { start, end })?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Number of committed (APPROVED) bookings on `item_id` that overlap `span`.
pub fn count_conflicts<S: BookingStore + ?Sized>(store: &S, item_id: &Ulid, span: &Span) -> usize {
    store.count_approved_overlapping(item_id, span)
}

/// Fails with `Reserved` when any approved booking on the item overlaps `span`.
pub(crate) fn check_no_conflict<S: BookingStore + ?Sized>(
    store: &S,
    item_id: &Ulid,
    span: &Span,
) -> Result<(), EngineError> {
    if count_conflicts(store, item_id, span) > 0 {
        return Err(Rejection::Reserved {
            item_id: *item_id,
            span: *span,
        }
        .into());
    }
    Ok(())
}
