use ulid::Ulid;

use crate::model::*;
use crate::store::BookingRepository;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Read-only overlap queries against committed bookings. Results are only
/// valid until the next write; nothing is cached.
pub struct ConflictDetector<'a> {
    bookings: &'a dyn BookingRepository,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(bookings: &'a dyn BookingRepository) -> Self {
        Self { bookings }
    }

    /// Bookings on `space_id` overlapping `[span.start, span.end)`, except
    /// `exclude`. A booking ending exactly at `span.start` does not conflict.
    pub async fn find_conflicts(
        &self,
        space_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        let found = self.bookings.find_conflicts(space_id, span, exclude).await?;
        Ok(found
            .into_iter()
            .filter(|b| b.space_id == space_id && Some(b.id) != exclude && b.span.overlaps(&span))
            .collect())
    }

    /// Overlapping bookings across every space of the location.
    pub async fn count_concurrent(
        &self,
        location: &Location,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<u32, EngineError> {
        Ok(self
            .bookings
            .count_concurrent_in_location(location.id, span, exclude)
            .await?)
    }

    /// True if one more booking over `span` would exceed the location cap.
    pub async fn location_saturated(
        &self,
        location: &Location,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        if location.max_concurrent_bookings == 0 {
            return Ok(false);
        }
        let count = self.count_concurrent(location, span, exclude).await?;
        Ok(count >= location.max_concurrent_bookings)
    }
}
