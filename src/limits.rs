use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_SUBJECT_LEN: usize = 1024;
/// Upper bound for any single booking, admin exemptions included.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * crate::model::DAY_MS;
pub const MAX_RECURRENCE_CYCLE: u32 = 365;
pub const DEFAULT_MAX_SERIES_INSTANCES: usize = 400;
