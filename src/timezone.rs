//! Attaching zone-less client timestamps to absolute instants.
//!
//! Zone names come from operators (location or organization settings), never
//! from clients, so a name the database cannot load is a configuration error.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::model::*;

pub const FALLBACK_ZONE: &str = "UTC";

/// Location zone if set, else the organization default, else `fallback`.
pub fn effective_zone_name<'a>(
    location_zone: &'a str,
    org_default: Option<&'a str>,
    fallback: &'a str,
) -> &'a str {
    let own = location_zone.trim();
    if !own.is_empty() {
        return own;
    }
    match org_default.map(str::trim) {
        Some(zone) if !zone.is_empty() => zone,
        _ => fallback,
    }
}

pub fn load_zone(name: &str) -> Result<Tz, EngineError> {
    name.parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimeZone(name.to_string()))
}

/// Interpret a wall-clock timestamp in `tz`.
///
/// Ambiguous times (fall-back overlap) take the earlier instant. Times inside a
/// spring-forward gap use the offset in force before the transition, which
/// pushes the wall clock forward by the size of the gap.
pub fn attach(naive: NaiveDateTime, tz: Tz) -> Ms {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        LocalResult::None => {
            let before = tz
                .offset_from_utc_datetime(&(naive - TimeDelta::days(1)))
                .fix()
                .local_minus_utc();
            (naive - TimeDelta::seconds(i64::from(before)))
                .and_utc()
                .timestamp_millis()
        }
    }
}

pub fn to_local(ms: Ms, tz: Tz) -> DateTime<Tz> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
        .with_timezone(&tz)
}

pub fn local_midnight(date: NaiveDate, tz: Tz) -> Ms {
    attach(date.and_time(NaiveTime::MIN), tz)
}

/// Elapsed length of a local calendar day: 23h or 25h on transition days.
pub fn local_day_length_ms(date: NaiveDate, tz: Tz) -> Ms {
    match date.succ_opt() {
        Some(next) => local_midnight(next, tz) - local_midnight(date, tz),
        None => DAY_MS,
    }
}

/// Sum of `24h - day length` over every local day that starts before
/// `span.end`, beginning with the day containing `span.start`.
///
/// Adding this to the elapsed duration yields the duration as experienced on
/// the wall clock, so a full local day always counts as 24h.
pub fn dst_correction_ms(span: &Span, tz: Tz) -> Ms {
    let mut correction = 0;
    let mut day = to_local(span.start, tz).date_naive();
    while local_midnight(day, tz) < span.end {
        correction += DAY_MS - local_day_length_ms(day, tz);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    correction
}
