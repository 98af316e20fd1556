use std::time::Instant;

use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::*;
use crate::recurrence;
use crate::timezone;

use super::conflict::{validate_span, ConflictDetector};
use super::policy::{BookingCandidate, PolicyValidator, Verdict};
use super::{Engine, EngineError, ReasonCode, SpaceContext};

/// Outcome of one series instance, in generation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceResult {
    pub index: usize,
    pub span: Span,
    pub success: bool,
    /// Set only for committed instances.
    pub booking_id: Option<Ulid>,
    pub reason: Option<ReasonCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesOutcome {
    /// `None` for dry runs and for series where no instance was accepted.
    pub series_id: Option<Ulid>,
    pub results: Vec<InstanceResult>,
}

impl SeriesOutcome {
    pub fn created(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

fn record_outcome<T>(op: &'static str, result: &Result<T, EngineError>, started: Instant) {
    metrics::histogram!(ADMISSION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
    match result {
        Ok(_) => metrics::counter!(BOOKINGS_ACCEPTED_TOTAL, "op" => op).increment(1),
        Err(e) => match e.reason() {
            Some(code) => {
                tracing::debug!("{op} rejected: {e}");
                metrics::counter!(BOOKINGS_REJECTED_TOTAL, "op" => op, "reason" => code.label()).increment(1);
            }
            None if e.kind() == super::ErrorKind::Internal => tracing::error!("{op} failed: {e}"),
            None => tracing::debug!("{op} refused: {e}"),
        },
    }
}

fn check_subject(space: &Space, subject: &str) -> Result<(), EngineError> {
    if subject.len() > MAX_SUBJECT_LEN {
        return Err(EngineError::LimitExceeded("subject too long"));
    }
    if space.require_subject && subject.trim().is_empty() {
        return Err(EngineError::Policy(ReasonCode::SubjectRequired));
    }
    Ok(())
}

/// Attach both wall-clock bounds in the location zone and reject empty or
/// inverted spans before any rule runs.
fn request_span(ctx: &SpaceContext, enter: NaiveDateTime, leave: NaiveDateTime) -> Result<Span, EngineError> {
    let start = timezone::attach(enter, ctx.tz);
    let end = timezone::attach(leave, ctx.tz);
    if end <= start {
        return Err(EngineError::Policy(ReasonCode::InvalidBookingDuration));
    }
    let span = Span::new(start, end);
    validate_span(&span)?;
    Ok(span)
}

fn validate_cadence(cadence: &Cadence) -> Result<(), EngineError> {
    let cycle = cadence.cycle();
    if cycle == 0 || cycle > MAX_RECURRENCE_CYCLE {
        return Err(EngineError::Policy(ReasonCode::InvalidRecurrence));
    }
    if let Cadence::Weekly { weekdays, .. } = cadence
        && weekdays.is_empty()
    {
        return Err(EngineError::Policy(ReasonCode::InvalidRecurrence));
    }
    Ok(())
}

impl Engine {
    /// Policy rules, then space conflict, then location capacity. Caller
    /// holds the space lock. `pending` are earlier instances of the same
    /// dry-run batch: they count as the owner's bookings and occupy their
    /// slots exactly as committed ones would.
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn admit(
        &self,
        ctx: &SpaceContext,
        actor: &User,
        owner: &User,
        span: Span,
        exclude: Option<Ulid>,
        pending: &[Span],
        now: Ms,
    ) -> Result<(), EngineError> {
        let validator = PolicyValidator::new(
            self.repos.bookings.as_ref(),
            self.repos.spaces.as_ref(),
            self.repos.groups.as_ref(),
            &ctx.policy,
            ctx.tz,
            now,
        );
        let pending_overlaps = pending.iter().filter(|s| s.overlaps(&span)).count() as u32;
        let candidate = BookingCandidate {
            owner_id: owner.id,
            actor_is_admin: actor.is_space_admin(),
            space_id: ctx.space.id,
            span,
            exclude,
            markup: pending.iter().filter(|s| s.end > now).count() as u32,
            pending_overlaps,
        };
        if let Verdict::Reject(code) = validator.validate(&candidate).await? {
            return Err(EngineError::Policy(code));
        }

        let detector = ConflictDetector::new(self.repos.bookings.as_ref());
        if let Some(existing) = detector.find_conflicts(ctx.space.id, span, exclude).await?.first() {
            return Err(EngineError::AlreadyExists(existing.id));
        }
        if pending_overlaps > 0 {
            return Err(EngineError::Policy(ReasonCode::SlotConflict));
        }
        if detector.location_saturated(&ctx.location, span, exclude).await? {
            return Err(EngineError::Policy(ReasonCode::LocationMaxConcurrent));
        }
        Ok(())
    }

    pub async fn create_booking(&self, actor: &User, req: BookingRequest) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.create_booking_inner(actor, req).await;
        record_outcome("create", &result, started);
        result
    }

    async fn create_booking_inner(&self, actor: &User, req: BookingRequest) -> Result<Booking, EngineError> {
        let ctx = self.space_context(actor, req.space_id).await?;
        let owner = self.resolve_owner(actor, req.on_behalf_of).await?;
        let span = request_span(&ctx, req.enter, req.leave)?;
        check_subject(&ctx.space, &req.subject)?;

        let _guard = self.lock_space(ctx.space.id).await;
        self.admit(&ctx, actor, &owner, span, None, &[], self.now_ms()).await?;

        let booking = Booking {
            id: Ulid::new(),
            user_id: owner.id,
            space_id: ctx.space.id,
            span,
            subject: req.subject,
            approved: !self.requires_approval_in(&ctx).await?,
            recurring_id: None,
            calendar_event_id: None,
        };
        self.repos.bookings.insert_booking(&booking).await?;
        tracing::info!("booking {} created on space {} for user {}", booking.id, booking.space_id, booking.user_id);
        self.publish_created(&booking);
        Ok(booking)
    }

    /// Move or resize a booking. The booking does not conflict with its own
    /// previous slot. Approval is kept unless the space changes.
    pub async fn update_booking(
        &self,
        actor: &User,
        booking_id: Ulid,
        req: BookingRequest,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.update_booking_inner(actor, booking_id, req).await;
        record_outcome("update", &result, started);
        result
    }

    async fn update_booking_inner(
        &self,
        actor: &User,
        booking_id: Ulid,
        req: BookingRequest,
    ) -> Result<Booking, EngineError> {
        let existing = self
            .repos
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        // Org check on the current space as well as the target.
        self.space_context(actor, existing.space_id).await?;
        if existing.user_id != actor.id && !actor.is_space_admin() {
            return Err(EngineError::Forbidden("not the booking owner"));
        }
        let ctx = self.space_context(actor, req.space_id).await?;
        let owner = self.load_user(actor, existing.user_id).await?;
        let span = request_span(&ctx, req.enter, req.leave)?;
        check_subject(&ctx.space, &req.subject)?;

        let _guards = self.lock_spaces(existing.space_id, ctx.space.id).await;
        self.admit(&ctx, actor, &owner, span, Some(booking_id), &[], self.now_ms())
            .await?;

        let moved = existing.space_id != ctx.space.id;
        let approved = if moved {
            !self.requires_approval_in(&ctx).await?
        } else {
            existing.approved
        };
        let booking = Booking {
            span,
            space_id: ctx.space.id,
            subject: req.subject,
            approved,
            ..existing
        };
        self.repos.bookings.update_booking(&booking).await?;
        tracing::info!("booking {} updated", booking.id);
        self.publish(Event::BookingUpdated { booking: booking.clone() });
        if moved && !booking.approved {
            self.publish(Event::ApprovalRequested { booking: booking.clone() });
        }
        Ok(booking)
    }

    /// Cancel a booking, subject to the organization's minimum lead time.
    pub async fn delete_booking(&self, actor: &User, booking_id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.delete_booking_inner(actor, booking_id).await;
        record_outcome("delete", &result, started);
        result
    }

    async fn delete_booking_inner(&self, actor: &User, booking_id: Ulid) -> Result<(), EngineError> {
        let booking = self
            .repos
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        let ctx = self.space_context(actor, booking.space_id).await?;
        if booking.user_id != actor.id && !actor.is_space_admin() {
            return Err(EngineError::Forbidden("not the booking owner"));
        }

        let policy = &ctx.policy;
        let exempt = policy.no_admin_restrictions && actor.is_space_admin();
        if policy.enable_max_hours_before_delete && policy.max_hours_before_delete > 0 && !exempt {
            let lead = booking.span.start - self.now_ms();
            if lead < policy.max_hours_before_delete * HOUR_MS {
                return Err(EngineError::Policy(ReasonCode::MaxHoursBeforeDelete));
            }
        }

        self.repos.bookings.delete_booking(booking_id).await?;
        tracing::info!("booking {} deleted by {}", booking_id, actor.id);
        self.publish(Event::BookingDeleted { booking });
        Ok(())
    }

    /// Expand and book a series. Instances are admitted one at a time against
    /// the committed state, so earlier instances count against later ones.
    /// Failing instances are reported, not fatal.
    pub async fn create_recurring(&self, actor: &User, req: RecurringRequest) -> Result<SeriesOutcome, EngineError> {
        let started = Instant::now();
        let result = self.process_series(actor, req, true).await;
        record_outcome("create_recurring", &result, started);
        result
    }

    /// Dry run of [`Engine::create_recurring`]. Nothing is persisted; accepted
    /// siblings go through the same checks as if they had been committed.
    pub async fn precheck_recurring(
        &self,
        actor: &User,
        req: RecurringRequest,
    ) -> Result<Vec<InstanceResult>, EngineError> {
        Ok(self.process_series(actor, req, false).await?.results)
    }

    async fn process_series(&self, actor: &User, req: RecurringRequest, commit: bool) -> Result<SeriesOutcome, EngineError> {
        let ctx = self.space_context(actor, req.space_id).await?;
        let owner = self.resolve_owner(actor, req.on_behalf_of).await?;
        let first = request_span(&ctx, req.enter, req.leave)?;
        check_subject(&ctx.space, &req.subject)?;
        validate_cadence(&req.cadence)?;
        let end = timezone::attach(req.end, ctx.tz);
        if end <= first.start {
            return Err(EngineError::Policy(ReasonCode::InvalidRecurrence));
        }

        let series = RecurringBooking {
            id: Ulid::new(),
            user_id: owner.id,
            space_id: ctx.space.id,
            subject: req.subject,
            cadence: req.cadence,
            first,
            end,
        };
        let cap = self.config.max_series_instances;
        let spans: Vec<Span> = recurrence::expand(&series, ctx.tz).take(cap + 1).collect();
        if spans.len() > cap {
            return Err(EngineError::LimitExceeded("too many series instances"));
        }
        if spans.is_empty() {
            return Err(EngineError::Policy(ReasonCode::InvalidRecurrence));
        }

        let _guard = self.lock_space(ctx.space.id).await;
        let approved = !self.requires_approval_in(&ctx).await?;
        if commit {
            self.repos.recurring.insert_recurring(&series).await?;
        }
        let now = self.now_ms();

        let mut accepted: Vec<Span> = Vec::new();
        let mut created: Vec<Booking> = Vec::new();
        let mut results = Vec::with_capacity(spans.len());
        for (index, span) in spans.into_iter().enumerate() {
            // Committed siblings are already in the store.
            let pending: &[Span] = if commit { &[] } else { &accepted };
            let outcome = match validate_span(&span) {
                Ok(()) => self.admit(&ctx, actor, &owner, span, None, pending, now).await,
                Err(e) => Err(e),
            };
            let outcome = match outcome {
                Ok(()) if commit => {
                    let booking = Booking {
                        id: Ulid::new(),
                        user_id: owner.id,
                        space_id: ctx.space.id,
                        span,
                        subject: series.subject.clone(),
                        approved,
                        recurring_id: Some(series.id),
                        calendar_event_id: None,
                    };
                    match self.repos.bookings.insert_booking(&booking).await {
                        Ok(()) => {
                            created.push(booking.clone());
                            Ok(Some(booking.id))
                        }
                        Err(e) => Err(EngineError::from(e)),
                    }
                }
                Ok(()) => Ok(None),
                Err(e) => Err(e),
            };
            let result = match outcome {
                Ok(booking_id) => {
                    accepted.push(span);
                    metrics::counter!(SERIES_INSTANCES_TOTAL, "outcome" => "accepted").increment(1);
                    InstanceResult { index, span, success: true, booking_id, reason: None }
                }
                Err(e) => {
                    if e.kind() == super::ErrorKind::Internal {
                        tracing::error!("series {} instance {index}: {e}", series.id);
                    } else {
                        tracing::debug!("series {} instance {index} rejected: {e}", series.id);
                    }
                    metrics::counter!(SERIES_INSTANCES_TOTAL, "outcome" => "rejected").increment(1);
                    InstanceResult { index, span, success: false, booking_id: None, reason: e.reason() }
                }
            };
            results.push(result);
        }

        if !commit {
            return Ok(SeriesOutcome { series_id: None, results });
        }
        let failed = (results.len() - created.len()) as u32;
        if created.is_empty() {
            self.repos.recurring.delete_recurring(series.id).await?;
            tracing::info!("series {} on space {} produced no bookings", series.id, series.space_id);
            return Ok(SeriesOutcome { series_id: None, results });
        }
        tracing::info!(
            "series {} on space {}: {} created, {} failed",
            series.id,
            series.space_id,
            created.len(),
            failed
        );
        for booking in &created {
            self.publish_created(booking);
        }
        self.publish(Event::SeriesCreated {
            series_id: series.id,
            space_id: series.space_id,
            created: created.len() as u32,
            failed,
        });
        Ok(SeriesOutcome { series_id: Some(series.id), results })
    }

    /// Remove a series: future instances are deleted, past and ongoing ones
    /// stay as standalone bookings.
    pub async fn delete_recurring(&self, actor: &User, series_id: Ulid) -> Result<(), EngineError> {
        let series = self
            .repos
            .recurring
            .get_recurring(series_id)
            .await?
            .ok_or(EngineError::NotFound(series_id))?;
        self.space_context(actor, series.space_id).await?;
        if series.user_id != actor.id && !actor.is_space_admin() {
            return Err(EngineError::Forbidden("not the series owner"));
        }

        let _guard = self.lock_space(series.space_id).await;
        let now = self.now_ms();
        let mut removed = 0u32;
        let mut detached = 0u32;
        for booking in self.repos.bookings.find_by_recurring(series_id).await? {
            if booking.span.start > now {
                self.repos.bookings.delete_booking(booking.id).await?;
                removed += 1;
                self.publish(Event::BookingDeleted { booking });
            } else {
                self.repos.bookings.clear_recurring_link(booking.id).await?;
                detached += 1;
            }
        }
        self.repos.recurring.delete_recurring(series_id).await?;
        tracing::info!("series {series_id} deleted: {removed} removed, {detached} detached");
        self.publish(Event::SeriesDeleted {
            series_id,
            space_id: series.space_id,
            removed,
            detached,
        });
        Ok(())
    }

    fn publish_created(&self, booking: &Booking) {
        self.publish(Event::BookingCreated { booking: booking.clone() });
        if !booking.approved {
            self.publish(Event::ApprovalRequested { booking: booking.clone() });
        }
    }
}
