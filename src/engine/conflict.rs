use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidSpan { start, end });
    }
    Ok(Span::new(start, end))
}

/// Reject `span` if it overlaps any committed reservation other than
/// `exclude`. The pending lock is never part of the comparison set.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match rs.overlapping(span, exclude).min_by_key(|r| (r.span.start, r.id)) {
        Some(existing) => Err(EngineError::Overlap(existing.id)),
        None => Ok(()),
    }
}
