use ulid::Ulid;

use crate::model::*;
use crate::observability::APPROVALS_TOTAL;

use super::{Engine, EngineError, SpaceContext};

impl Engine {
    /// Whether new bookings on the space start out pending.
    pub async fn requires_approval(&self, actor: &User, space_id: Ulid) -> Result<bool, EngineError> {
        let ctx = self.space_context(actor, space_id).await?;
        self.requires_approval_in(&ctx).await
    }

    pub(super) async fn requires_approval_in(&self, ctx: &SpaceContext) -> Result<bool, EngineError> {
        if !ctx.policy.groups_enabled {
            return Ok(false);
        }
        let approvers = self.repos.spaces.approver_group_ids(ctx.space.id).await?;
        Ok(!approvers.is_empty())
    }

    /// Space admins approve everything in their organization; other users
    /// need membership in one of the space's approver groups.
    async fn can_approve(&self, actor: &User, space_id: Ulid) -> Result<bool, EngineError> {
        if actor.is_space_admin() {
            return Ok(true);
        }
        let approvers = self.repos.spaces.approver_group_ids(space_id).await?;
        if approvers.is_empty() {
            return Ok(false);
        }
        let member_of = self.repos.groups.memberships_of(actor.id).await?;
        Ok(member_of.iter().any(|g| approvers.contains(g)))
    }

    /// Load a pending booking the actor may decide on.
    async fn pending_for_decision(&self, actor: &User, booking_id: Ulid) -> Result<Booking, EngineError> {
        let booking = self
            .repos
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        self.space_context(actor, booking.space_id).await?;
        if !self.can_approve(actor, booking.space_id).await? {
            return Err(EngineError::Forbidden("not an approver for this space"));
        }
        if booking.approved {
            return Err(EngineError::AlreadyDecided(booking_id));
        }
        Ok(booking)
    }

    pub async fn approve_booking(&self, actor: &User, booking_id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.pending_for_decision(actor, booking_id).await?;
        let booking = Booking { approved: true, ..booking };
        self.repos.bookings.update_booking(&booking).await?;
        metrics::counter!(APPROVALS_TOTAL, "decision" => "approved").increment(1);
        tracing::info!("booking {} approved by {}", booking.id, actor.id);
        self.publish(Event::BookingApproved { booking: booking.clone() });
        Ok(booking)
    }

    /// Declining removes the booking. Other instances of the same series are
    /// not touched.
    pub async fn decline_booking(&self, actor: &User, booking_id: Ulid) -> Result<(), EngineError> {
        let booking = self.pending_for_decision(actor, booking_id).await?;
        self.repos.bookings.delete_booking(booking_id).await?;
        metrics::counter!(APPROVALS_TOTAL, "decision" => "declined").increment(1);
        tracing::info!("booking {} declined by {}", booking.id, actor.id);
        self.publish(Event::BookingDeclined { booking });
        Ok(())
    }

    /// Pending bookings, not yet ended, in spaces the actor may approve.
    pub async fn pending_approvals(&self, actor: &User) -> Result<Vec<Booking>, EngineError> {
        let space_ids = self.approvable_spaces(actor).await?;
        if space_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .repos
            .bookings
            .find_pending_in_spaces(&space_ids, self.now_ms())
            .await?)
    }

    pub async fn count_pending_approvals(&self, actor: &User) -> Result<usize, EngineError> {
        Ok(self.pending_approvals(actor).await?.len())
    }

    async fn approvable_spaces(&self, actor: &User) -> Result<Vec<Ulid>, EngineError> {
        let mut ids = Vec::new();
        if actor.is_space_admin() {
            for location in self.repos.locations.locations_in_org(actor.org_id).await? {
                let spaces = self.repos.spaces.spaces_in_location(location.id).await?;
                ids.extend(spaces.into_iter().map(|s| s.id));
            }
            return Ok(ids);
        }
        let member_of = self.repos.groups.memberships_of(actor.id).await?;
        if member_of.is_empty() {
            return Ok(ids);
        }
        // Only spaces of the actor's organization.
        for space_id in self.repos.spaces.spaces_approved_by(&member_of).await? {
            if self.space_context(actor, space_id).await.is_ok() {
                ids.push(space_id);
            }
        }
        Ok(ids)
    }
}
