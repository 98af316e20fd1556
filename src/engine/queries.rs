use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;
use crate::timezone;

use super::conflict::ConflictDetector;
use super::{Engine, EngineError};

impl Engine {
    /// Visible to the owner, space admins and approvers of the space.
    pub async fn get_booking(&self, actor: &User, booking_id: Ulid) -> Result<Booking, EngineError> {
        let booking = self
            .repos
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        self.space_context(actor, booking.space_id).await?;
        if booking.user_id == actor.id || actor.is_space_admin() {
            return Ok(booking);
        }
        let approvers = self.repos.spaces.approver_group_ids(booking.space_id).await?;
        let member_of = self.repos.groups.memberships_of(actor.id).await?;
        if member_of.iter().any(|g| approvers.contains(g)) {
            return Ok(booking);
        }
        Err(EngineError::NotFound(booking_id))
    }

    pub async fn get_recurring(&self, actor: &User, series_id: Ulid) -> Result<RecurringBooking, EngineError> {
        let series = self
            .repos
            .recurring
            .get_recurring(series_id)
            .await?
            .ok_or(EngineError::NotFound(series_id))?;
        self.space_context(actor, series.space_id).await?;
        if series.user_id != actor.id && !actor.is_space_admin() {
            return Err(EngineError::NotFound(series_id));
        }
        Ok(series)
    }

    /// Bookings still linked to the series, ordered by start.
    pub async fn bookings_in_series(&self, actor: &User, series_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        self.get_recurring(actor, series_id).await?;
        Ok(self.repos.bookings.find_by_recurring(series_id).await?)
    }

    /// Bookings on the space overlapping a wall-clock window in the
    /// location zone.
    pub async fn find_conflicts(
        &self,
        actor: &User,
        space_id: Ulid,
        enter: NaiveDateTime,
        leave: NaiveDateTime,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        let ctx = self.space_context(actor, space_id).await?;
        let start = timezone::attach(enter, ctx.tz);
        let end = timezone::attach(leave, ctx.tz);
        if end <= start {
            return Ok(Vec::new());
        }
        ConflictDetector::new(self.repos.bookings.as_ref())
            .find_conflicts(space_id, Span::new(start, end), exclude)
            .await
    }
}
