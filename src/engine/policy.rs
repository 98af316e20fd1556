//! Organization booking rules, evaluated in a fixed order; the first failing
//! rule decides the reason code reported to the client.

use chrono_tz::Tz;
use ulid::Ulid;

use crate::model::*;
use crate::settings::OrgPolicy;
use crate::store::{BookingRepository, GroupRepository, SpaceRepository};
use crate::timezone::{dst_correction_ms, to_local};

use super::{EngineError, ReasonCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(ReasonCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Duration,
    AdvanceWindow,
    UserConcurrent,
    MinDuration,
    UpcomingCap,
    AllowedBooker,
}

/// Evaluation order. Clients see the code of the first rule that fails.
pub const RULE_CHAIN: [Rule; 6] = [
    Rule::Duration,
    Rule::AdvanceWindow,
    Rule::UserConcurrent,
    Rule::MinDuration,
    Rule::UpcomingCap,
    Rule::AllowedBooker,
];

/// Slack on the "leave is not in the past" check in daily-basis mode, so a
/// whole-day booking for today is still accepted late in the day.
const DAILY_PAST_GRACE_MS: Ms = 12 * HOUR_MS;

impl Rule {
    pub fn code(self) -> ReasonCode {
        match self {
            Rule::Duration => ReasonCode::InvalidBookingDuration,
            Rule::AdvanceWindow => ReasonCode::TooManyDaysInAdvance,
            Rule::UserConcurrent => ReasonCode::MaxConcurrentForUser,
            Rule::MinDuration => ReasonCode::InvalidMinBookingDuration,
            Rule::UpcomingCap => ReasonCode::TooManyUpcomingBookings,
            Rule::AllowedBooker => ReasonCode::NotAllowedBooker,
        }
    }

    /// Rules skipped for space admins when the organization disables admin
    /// restrictions. The advance window, minimum duration and allowed
    /// bookers still apply.
    pub fn admin_exempt(self) -> bool {
        matches!(self, Rule::Duration | Rule::UserConcurrent | Rule::UpcomingCap)
    }
}

#[derive(Debug, Clone)]
pub struct BookingCandidate {
    /// The user the booking is for.
    pub owner_id: Ulid,
    /// Whether the acting user is a space admin or above.
    pub actor_is_admin: bool,
    pub space_id: Ulid,
    pub span: Span,
    /// The booking being replaced on update. The upcoming cap is not
    /// re-checked for updates.
    pub exclude: Option<Ulid>,
    /// Bookings of the same batch accepted earlier but not yet persisted.
    pub markup: u32,
    /// How many of those unpersisted bookings overlap `span`.
    pub pending_overlaps: u32,
}

pub struct PolicyValidator<'a> {
    bookings: &'a dyn BookingRepository,
    spaces: &'a dyn SpaceRepository,
    groups: &'a dyn GroupRepository,
    policy: &'a OrgPolicy,
    tz: Tz,
    now: Ms,
}

impl<'a> PolicyValidator<'a> {
    pub fn new(
        bookings: &'a dyn BookingRepository,
        spaces: &'a dyn SpaceRepository,
        groups: &'a dyn GroupRepository,
        policy: &'a OrgPolicy,
        tz: Tz,
        now: Ms,
    ) -> Self {
        Self { bookings, spaces, groups, policy, tz, now }
    }

    pub async fn validate(&self, candidate: &BookingCandidate) -> Result<Verdict, EngineError> {
        let exempt = self.policy.no_admin_restrictions && candidate.actor_is_admin;
        for rule in RULE_CHAIN {
            if exempt && rule.admin_exempt() {
                continue;
            }
            if rule == Rule::UpcomingCap && candidate.exclude.is_some() {
                continue;
            }
            if !self.passes(rule, candidate).await? {
                tracing::debug!("booking for {} on {} failed {:?}", candidate.owner_id, candidate.space_id, rule);
                return Ok(Verdict::Reject(rule.code()));
            }
        }
        Ok(Verdict::Accept)
    }

    async fn passes(&self, rule: Rule, c: &BookingCandidate) -> Result<bool, EngineError> {
        match rule {
            Rule::Duration => Ok(self.duration_ok(&c.span)),
            Rule::AdvanceWindow => Ok(self.advance_ok(&c.span)),
            Rule::UserConcurrent => {
                let max = self.policy.max_concurrent_bookings_per_user;
                if max <= 0 {
                    return Ok(true);
                }
                let count = self
                    .bookings
                    .count_overlapping_for_user(c.owner_id, c.span, c.exclude)
                    .await?;
                Ok(i64::from(count) + i64::from(c.pending_overlaps) < max)
            }
            Rule::MinDuration => {
                let min = self.policy.min_booking_duration_hours;
                Ok(min <= 0 || c.span.duration_ms() >= min * HOUR_MS)
            }
            Rule::UpcomingCap => {
                let max = self.policy.max_bookings_per_user;
                if max <= 0 {
                    return Ok(true);
                }
                let upcoming = self.bookings.count_upcoming_for_user(c.owner_id, self.now).await?;
                Ok(i64::from(upcoming) + i64::from(c.markup) < max)
            }
            Rule::AllowedBooker => {
                let allowed = self.spaces.allowed_booker_group_ids(c.space_id).await?;
                if allowed.is_empty() {
                    return Ok(true);
                }
                let member_of = self.groups.memberships_of(c.owner_id).await?;
                Ok(member_of.iter().any(|g| allowed.contains(g)))
            }
        }
    }

    fn duration_ok(&self, span: &Span) -> bool {
        let max_hours = self.policy.max_booking_duration_hours;
        if !self.policy.daily_basis_booking {
            let elapsed = span.duration_ms();
            return elapsed > 0 && elapsed <= max_hours * HOUR_MS;
        }
        // Whole local days only; the cap is rounded up to full days.
        let wall = round_to_minute(span.duration_ms()) + dst_correction_ms(span, self.tz);
        let max_days = ((max_hours + 23) / 24).max(1);
        wall > 0 && wall % DAY_MS == 0 && wall <= max_days * DAY_MS
    }

    fn advance_ok(&self, span: &Span) -> bool {
        let max_days = self.policy.max_days_in_advance;
        if self.policy.daily_basis_booking {
            if span.end < self.now - DAILY_PAST_GRACE_MS {
                return false;
            }
            let today = to_local(self.now, self.tz).date_naive();
            let enter_day = to_local(span.start, self.tz).date_naive();
            return (enter_day - today).num_days() <= max_days;
        }
        span.end >= self.now && span.start - self.now <= max_days * DAY_MS
    }
}

fn round_to_minute(ms: Ms) -> Ms {
    (ms + MINUTE_MS / 2).div_euclid(MINUTE_MS) * MINUTE_MS
}
