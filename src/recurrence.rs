//! Expansion of a recurring booking into concrete instance spans.
//!
//! The cursor walks local calendar days in the location's zone, so the enter
//! wall-clock time is stable across daylight-saving changes. Every instance
//! keeps the elapsed duration of the first occurrence.

use chrono::{Datelike, Days, NaiveDateTime};
use chrono_tz::Tz;

use crate::model::*;
use crate::timezone::{attach, to_local};

/// Lazily generated, finite sequence of instance spans. Not restartable:
/// call [`expand`] again to regenerate.
#[derive(Debug, Clone)]
pub struct Occurrences {
    tz: Tz,
    cadence: Cadence,
    duration: Ms,
    end: Ms,
    /// Local wall-clock enter time of the next candidate.
    cursor: Option<NaiveDateTime>,
}

pub fn expand(series: &RecurringBooking, tz: Tz) -> Occurrences {
    let start = to_local(series.first.start, tz).naive_local();
    let cycle = series.cadence.cycle();
    let cursor = match &series.cadence {
        _ if cycle == 0 => None,
        Cadence::Daily { .. } => Some(start),
        Cadence::Weekly { weekdays, .. } => align_to_weekday(start, weekdays),
    };
    Occurrences {
        tz,
        cadence: series.cadence.clone(),
        duration: series.first.duration_ms(),
        end: series.end,
        cursor,
    }
}

/// Walk forward one day at a time until the cursor falls on a listed weekday.
fn align_to_weekday(mut cursor: NaiveDateTime, weekdays: &WeekdaySet) -> Option<NaiveDateTime> {
    if weekdays.is_empty() {
        return None;
    }
    while !weekdays.contains(cursor.weekday()) {
        cursor = cursor.checked_add_days(Days::new(1))?;
    }
    Some(cursor)
}

/// Days from a listed weekday to the next listed one, wrapping into a
/// cycle-adjusted future week after the last weekday in the set.
fn weekly_step(current: u32, weekdays: &WeekdaySet, cycle: u32) -> u64 {
    match weekdays.indexes().find(|d| *d > current) {
        Some(next) => u64::from(next - current),
        None => {
            let first = weekdays.indexes().next().unwrap_or(current);
            u64::from(7 - current + first) + 7 * u64::from(cycle - 1)
        }
    }
}

impl Iterator for Occurrences {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        let cursor = self.cursor?;
        let enter = attach(cursor, self.tz);
        if enter >= self.end || self.duration <= 0 {
            self.cursor = None;
            return None;
        }

        let step = match &self.cadence {
            Cadence::Daily { cycle } => u64::from(*cycle),
            Cadence::Weekly { cycle, weekdays } => {
                weekly_step(cursor.weekday().num_days_from_sunday(), weekdays, *cycle)
            }
        };
        self.cursor = cursor.checked_add_days(Days::new(step));

        Some(Span::new(enter, enter + self.duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Weekday};
    use ulid::Ulid;

    fn at(y: i32, m: u32, d: u32, h: u32) -> Ms {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn series(cadence: Cadence, first: Span, end: Ms) -> RecurringBooking {
        RecurringBooking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            space_id: Ulid::new(),
            subject: String::new(),
            cadence,
            first,
            end,
        }
    }

    fn days_of(spans: &[Span]) -> Vec<u32> {
        spans
            .iter()
            .map(|s| to_local(s.start, Tz::UTC).day())
            .collect()
    }

    #[test]
    fn daily_every_third_day() {
        let s = series(
            Cadence::Daily { cycle: 3 },
            Span::new(at(2023, 10, 1, 9), at(2023, 10, 1, 17)),
            at(2023, 10, 20, 0),
        );
        let spans: Vec<Span> = expand(&s, Tz::UTC).collect();
        assert_eq!(days_of(&spans), vec![1, 4, 7, 10, 13, 16, 19]);
        assert!(spans.iter().all(|sp| sp.duration_ms() == 8 * HOUR_MS));
    }

    #[test]
    fn expansion_is_deterministic() {
        let s = series(
            Cadence::Weekly {
                cycle: 1,
                weekdays: [Weekday::Mon, Weekday::Thu].into_iter().collect(),
            },
            Span::new(at(2023, 10, 2, 8), at(2023, 10, 2, 12)),
            at(2023, 12, 1, 0),
        );
        let a: Vec<Span> = expand(&s, Tz::UTC).collect();
        let b: Vec<Span> = expand(&s, Tz::UTC).collect();
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn weekly_off_weekday_start_shifts_forward() {
        // 2023-10-03 is a Tuesday.
        let s = series(
            Cadence::Weekly {
                cycle: 1,
                weekdays: [Weekday::Mon, Weekday::Wed, Weekday::Fri].into_iter().collect(),
            },
            Span::new(at(2023, 10, 3, 9), at(2023, 10, 3, 10)),
            at(2023, 10, 14, 0),
        );
        let spans: Vec<Span> = expand(&s, Tz::UTC).collect();
        assert_eq!(days_of(&spans), vec![4, 6, 9, 11, 13]);
        assert_eq!(spans[0], Span::new(at(2023, 10, 4, 9), at(2023, 10, 4, 10)));
    }

    #[test]
    fn weekly_wrap_respects_cycle() {
        let s = series(
            Cadence::Weekly {
                cycle: 2,
                weekdays: [Weekday::Tue].into_iter().collect(),
            },
            Span::new(at(2023, 10, 3, 9), at(2023, 10, 3, 17)),
            at(2023, 11, 2, 0),
        );
        let spans: Vec<Span> = expand(&s, Tz::UTC).collect();
        assert_eq!(days_of(&spans), vec![3, 17, 31]);
    }

    #[test]
    fn weekly_multiple_days_with_cycle() {
        // Mon + Wed every other week, starting Monday 2023-10-02.
        let s = series(
            Cadence::Weekly {
                cycle: 2,
                weekdays: [Weekday::Mon, Weekday::Wed].into_iter().collect(),
            },
            Span::new(at(2023, 10, 2, 9), at(2023, 10, 2, 10)),
            at(2023, 10, 31, 0),
        );
        let spans: Vec<Span> = expand(&s, Tz::UTC).collect();
        assert_eq!(days_of(&spans), vec![2, 4, 16, 18, 30]);
    }

    #[test]
    fn sunday_is_first_in_week() {
        // Sun + Sat with cycle 1: Saturday wraps to the following Sunday.
        let s = series(
            Cadence::Weekly {
                cycle: 1,
                weekdays: [Weekday::Sat, Weekday::Sun].into_iter().collect(),
            },
            Span::new(at(2023, 10, 1, 9), at(2023, 10, 1, 10)),
            at(2023, 10, 16, 0),
        );
        let spans: Vec<Span> = expand(&s, Tz::UTC).collect();
        assert_eq!(days_of(&spans), vec![1, 7, 8, 14, 15]);
    }

    #[test]
    fn empty_weekday_set_yields_nothing() {
        let s = series(
            Cadence::Weekly { cycle: 1, weekdays: WeekdaySet::empty() },
            Span::new(at(2023, 10, 3, 9), at(2023, 10, 3, 17)),
            at(2023, 11, 2, 0),
        );
        assert_eq!(expand(&s, Tz::UTC).count(), 0);
    }

    #[test]
    fn zero_cycle_yields_nothing() {
        let s = series(
            Cadence::Daily { cycle: 0 },
            Span::new(at(2023, 10, 3, 9), at(2023, 10, 3, 17)),
            at(2023, 11, 2, 0),
        );
        assert_eq!(expand(&s, Tz::UTC).count(), 0);
    }

    #[test]
    fn end_is_exclusive() {
        let s = series(
            Cadence::Daily { cycle: 1 },
            Span::new(at(2023, 10, 1, 9), at(2023, 10, 1, 17)),
            at(2023, 10, 3, 9),
        );
        let spans: Vec<Span> = expand(&s, Tz::UTC).collect();
        assert_eq!(days_of(&spans), vec![1, 2]);
    }

    #[test]
    fn daily_keeps_wall_clock_enter_across_dst() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        // 09:00 CET on Saturday 2026-03-28, series runs past the spring-forward.
        let enter = attach(
            NaiveDate::from_ymd_opt(2026, 3, 28).unwrap().and_hms_opt(9, 0, 0).unwrap(),
            tz,
        );
        let s = series(
            Cadence::Daily { cycle: 1 },
            Span::new(enter, enter + 8 * HOUR_MS),
            enter + 3 * DAY_MS - 2 * HOUR_MS,
        );
        let spans: Vec<Span> = expand(&s, tz).collect();
        assert_eq!(spans.len(), 3);
        for sp in &spans {
            assert_eq!(to_local(sp.start, tz).time(), chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap());
            assert_eq!(sp.duration_ms(), 8 * HOUR_MS);
        }
        // The local day is 23h long, so consecutive enters are 23h apart.
        assert_eq!(spans[1].start - spans[0].start, 23 * HOUR_MS);
    }
}
