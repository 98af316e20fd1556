use chrono::{NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC), the only stored time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Organization-scoped role, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    SpaceAdmin,
    OrgAdmin,
    SuperAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub org_id: Ulid,
    pub role: Role,
}

impl User {
    pub fn is_space_admin(&self) -> bool {
        self.role >= Role::SpaceAdmin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: Ulid,
    pub org_id: Ulid,
    pub name: String,
    /// IANA zone name; empty falls back to the organization default.
    pub timezone: String,
    /// Cap on overlapping bookings across all spaces (0 = unlimited).
    pub max_concurrent_bookings: u32,
}

/// A reservable desk or room. Approver and allowed-booker groups are
/// associations held by the space repository, not fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub location_id: Ulid,
    pub name: String,
    pub require_subject: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub space_id: Ulid,
    pub span: Span,
    pub subject: String,
    pub approved: bool,
    /// Series that generated this booking; `None` for manual bookings.
    pub recurring_id: Option<Ulid>,
    pub calendar_event_id: Option<String>,
}

/// Derived from `Booking::approved`. Declined bookings are deleted, so there
/// is no stored declined state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    PendingApproval,
    Approved,
}

impl Booking {
    pub fn approval_state(&self) -> ApprovalState {
        if self.approved {
            ApprovalState::Approved
        } else {
            ApprovalState::PendingApproval
        }
    }
}

/// Set of weekdays, iterated Sunday first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<Weekday>", from = "Vec<Weekday>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_sunday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.contains_index(day.num_days_from_sunday())
    }

    pub(crate) fn contains_index(&self, idx: u32) -> bool {
        idx < 7 && self.0 & (1 << idx) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Day indexes (Sunday = 0) in ascending order.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = u32> + '_ {
        (0..7).filter(move |i| self.contains_index(*i))
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        self.indexes().map(weekday_from_sunday_index)
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::empty();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl From<Vec<Weekday>> for WeekdaySet {
    fn from(days: Vec<Weekday>) -> Self {
        days.into_iter().collect()
    }
}

impl From<WeekdaySet> for Vec<Weekday> {
    fn from(set: WeekdaySet) -> Self {
        set.iter().collect()
    }
}

pub(crate) fn weekday_from_sunday_index(idx: u32) -> Weekday {
    match idx % 7 {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        _ => Weekday::Sat,
    }
}

/// Recurrence rule family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cadence", rename_all = "snake_case")]
pub enum Cadence {
    /// Every `cycle` days.
    Daily { cycle: u32 },
    /// On each listed weekday, skipping `cycle - 1` weeks between groups.
    Weekly { cycle: u32, weekdays: WeekdaySet },
}

impl Cadence {
    pub fn cycle(&self) -> u32 {
        match self {
            Cadence::Daily { cycle } | Cadence::Weekly { cycle, .. } => *cycle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringBooking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub space_id: Ulid,
    pub subject: String,
    pub cadence: Cadence,
    /// First occurrence as requested.
    pub first: Span,
    /// Exclusive: no instance starts at or after this instant.
    pub end: Ms,
}

/// Committed changes, published to subscribers and notification sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    BookingCreated { booking: Booking },
    BookingUpdated { booking: Booking },
    BookingDeleted { booking: Booking },
    ApprovalRequested { booking: Booking },
    BookingApproved { booking: Booking },
    BookingDeclined { booking: Booking },
    SeriesCreated {
        series_id: Ulid,
        space_id: Ulid,
        created: u32,
        failed: u32,
    },
    SeriesDeleted {
        series_id: Ulid,
        space_id: Ulid,
        removed: u32,
        detached: u32,
    },
}

impl Event {
    pub fn space_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { booking }
            | Event::BookingUpdated { booking }
            | Event::BookingDeleted { booking }
            | Event::ApprovalRequested { booking }
            | Event::BookingApproved { booking }
            | Event::BookingDeclined { booking } => booking.space_id,
            Event::SeriesCreated { space_id, .. } | Event::SeriesDeleted { space_id, .. } => {
                *space_id
            }
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Event::BookingCreated { .. } => "booking_created",
            Event::BookingUpdated { .. } => "booking_updated",
            Event::BookingDeleted { .. } => "booking_deleted",
            Event::ApprovalRequested { .. } => "approval_requested",
            Event::BookingApproved { .. } => "booking_approved",
            Event::BookingDeclined { .. } => "booking_declined",
            Event::SeriesCreated { .. } => "series_created",
            Event::SeriesDeleted { .. } => "series_deleted",
        }
    }
}

// ── Requests ─────────────────────────────────────────────────

/// Create or update a single booking. `enter`/`leave` are wall-clock times in
/// the space's location zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub space_id: Ulid,
    pub enter: NaiveDateTime,
    pub leave: NaiveDateTime,
    #[serde(default)]
    pub subject: String,
    /// Book for another user of the organization (space admins only).
    #[serde(default)]
    pub on_behalf_of: Option<Ulid>,
}

/// Create or dry-run a series. `enter`/`leave` describe the first
/// occurrence, `end` is the exclusive local end of the series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringRequest {
    pub space_id: Ulid,
    pub enter: NaiveDateTime,
    pub leave: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(flatten)]
    pub cadence: Cadence,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub on_behalf_of: Option<Ulid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurring_request_flattens_cadence() {
        let json = serde_json::json!({
            "space_id": Ulid::nil().to_string(),
            "enter": "2023-10-02T09:00:00",
            "leave": "2023-10-02T17:00:00",
            "end": "2023-10-20T00:00:00",
            "cadence": "weekly",
            "cycle": 1,
            "weekdays": ["Mon", "Wed"],
        });
        let req: RecurringRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.cadence.cycle(), 1);
        assert!(req.subject.is_empty());
        assert_eq!(req.on_behalf_of, None);
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_overlap_is_symmetric() {
        let spans = [
            Span::new(0, 10),
            Span::new(5, 15),
            Span::new(10, 20),
            Span::new(-5, 1),
            Span::new(2, 3),
            Span::new(0, 100),
        ];
        for a in &spans {
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn role_ordering() {
        assert!(Role::SuperAdmin > Role::OrgAdmin);
        assert!(Role::OrgAdmin > Role::SpaceAdmin);
        assert!(Role::SpaceAdmin > Role::User);
        let user = User { id: Ulid::new(), org_id: Ulid::new(), role: Role::OrgAdmin };
        assert!(user.is_space_admin());
    }

    #[test]
    fn weekday_set_iterates_sunday_first() {
        let set: WeekdaySet = [Weekday::Fri, Weekday::Sun, Weekday::Wed].into_iter().collect();
        let days: Vec<Weekday> = set.iter().collect();
        assert_eq!(days, vec![Weekday::Sun, Weekday::Wed, Weekday::Fri]);
        assert_eq!(set.len(), 3);
        assert!(set.contains(Weekday::Wed));
        assert!(!set.contains(Weekday::Mon));
        assert!(WeekdaySet::empty().is_empty());
    }

    #[test]
    fn cadence_serializes_as_tagged_union() {
        let weekly = Cadence::Weekly {
            cycle: 2,
            weekdays: [Weekday::Mon, Weekday::Thu].into_iter().collect(),
        };
        let json = serde_json::to_value(&weekly).unwrap();
        assert_eq!(json["cadence"], "weekly");
        assert_eq!(json["cycle"], 2);
        assert_eq!(json["weekdays"], serde_json::json!(["Mon", "Thu"]));

        let daily: Cadence = serde_json::from_str(r#"{"cadence":"daily","cycle":3}"#).unwrap();
        assert_eq!(daily, Cadence::Daily { cycle: 3 });
        assert_eq!(daily.cycle(), 3);
    }

    #[test]
    fn approval_state_follows_flag() {
        let mut booking = Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            space_id: Ulid::new(),
            span: Span::new(0, HOUR_MS),
            subject: String::new(),
            approved: false,
            recurring_id: None,
            calendar_event_id: None,
        };
        assert_eq!(booking.approval_state(), ApprovalState::PendingApproval);
        booking.approved = true;
        assert_eq!(booking.approval_state(), ApprovalState::Approved);
    }

    #[test]
    fn event_reports_space() {
        let space_id = Ulid::new();
        let event = Event::SeriesDeleted { series_id: Ulid::new(), space_id, removed: 1, detached: 2 };
        assert_eq!(event.space_id(), space_id);
        assert_eq!(event.label(), "series_deleted");
    }
}
