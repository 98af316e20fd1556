use ulid::Ulid;

use crate::store::StoreError;

/// Stable client-facing reason codes. Clients branch on these integers, so
/// existing values must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ReasonCode {
    SlotConflict = 1001,
    LocationMaxConcurrent = 1002,
    TooManyUpcomingBookings = 1003,
    TooManyDaysInAdvance = 1004,
    InvalidBookingDuration = 1005,
    MaxConcurrentForUser = 1006,
    InvalidMinBookingDuration = 1007,
    MaxHoursBeforeDelete = 1008,
    NotAllowedBooker = 1009,
    SubjectRequired = 1010,
    InvalidRecurrence = 1011,
}

impl ReasonCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Short label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            ReasonCode::SlotConflict => "slot_conflict",
            ReasonCode::LocationMaxConcurrent => "location_max_concurrent",
            ReasonCode::TooManyUpcomingBookings => "too_many_upcoming_bookings",
            ReasonCode::TooManyDaysInAdvance => "too_many_days_in_advance",
            ReasonCode::InvalidBookingDuration => "invalid_booking_duration",
            ReasonCode::MaxConcurrentForUser => "max_concurrent_for_user",
            ReasonCode::InvalidMinBookingDuration => "invalid_min_booking_duration",
            ReasonCode::MaxHoursBeforeDelete => "max_hours_before_delete",
            ReasonCode::NotAllowedBooker => "not_allowed_booker",
            ReasonCode::SubjectRequired => "subject_required",
            ReasonCode::InvalidRecurrence => "invalid_recurrence",
        }
    }
}

/// Outcome class; the transport maps it to its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Forbidden,
    Conflict,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    /// A booking policy rule rejected the request.
    Policy(ReasonCode),
    /// The slot is held by another booking (pre-flight or store constraint).
    AlreadyExists(Ulid),
    NotFound(Ulid),
    Forbidden(&'static str),
    /// The approval decision was already taken.
    AlreadyDecided(Ulid),
    LimitExceeded(&'static str),
    InvalidTimeZone(String),
    Store(StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Policy(_) | EngineError::LimitExceeded(_) => ErrorKind::BadRequest,
            EngineError::AlreadyExists(_) | EngineError::AlreadyDecided(_) => ErrorKind::Conflict,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::InvalidTimeZone(_) | EngineError::Store(_) => ErrorKind::Internal,
        }
    }

    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            EngineError::Policy(code) => Some(*code),
            EngineError::AlreadyExists(_) => Some(ReasonCode::SlotConflict),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::Conflict(id) => EngineError::AlreadyExists(id),
            other => EngineError::Store(other),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Policy(code) => {
                write!(f, "rejected by booking policy: {} ({})", code.label(), code.code())
            }
            EngineError::AlreadyExists(id) => write!(f, "slot already booked by {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::AlreadyDecided(id) => write!(f, "booking {id} is not pending approval"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::InvalidTimeZone(name) => write!(f, "invalid time zone configured: {name:?}"),
            EngineError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(ReasonCode::SlotConflict.code(), 1001);
        assert_eq!(ReasonCode::LocationMaxConcurrent.code(), 1002);
        assert_eq!(ReasonCode::TooManyUpcomingBookings.code(), 1003);
        assert_eq!(ReasonCode::TooManyDaysInAdvance.code(), 1004);
        assert_eq!(ReasonCode::InvalidBookingDuration.code(), 1005);
        assert_eq!(ReasonCode::MaxConcurrentForUser.code(), 1006);
        assert_eq!(ReasonCode::InvalidMinBookingDuration.code(), 1007);
        assert_eq!(ReasonCode::MaxHoursBeforeDelete.code(), 1008);
        assert_eq!(ReasonCode::NotAllowedBooker.code(), 1009);
        assert_eq!(ReasonCode::SubjectRequired.code(), 1010);
        assert_eq!(ReasonCode::InvalidRecurrence.code(), 1011);
    }

    #[test]
    fn store_conflict_maps_to_already_exists() {
        let id = Ulid::new();
        let err: EngineError = StoreError::Conflict(id).into();
        assert!(matches!(err, EngineError::AlreadyExists(x) if x == id));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.reason(), Some(ReasonCode::SlotConflict));
    }

    #[test]
    fn kinds() {
        assert_eq!(EngineError::Policy(ReasonCode::NotAllowedBooker).kind(), ErrorKind::BadRequest);
        assert_eq!(EngineError::InvalidTimeZone("Nowhere".into()).kind(), ErrorKind::Internal);
        assert_eq!(EngineError::Forbidden("x").kind(), ErrorKind::Forbidden);
        assert_eq!(EngineError::NotFound(Ulid::new()).reason(), None);
        let unavailable: EngineError = StoreError::Unavailable("down".into()).into();
        assert_eq!(unavailable.kind(), ErrorKind::Internal);
    }
}
