//! Calendar-field schedules.
//!
//! Each field schedule recurs at the start of every calendar unit whose field
//! equals a target: second 5 of every minute, hour 9 of every day, day 30 of
//! every month. Computation happens on local wall-clock time in a chrono
//! [`TimeZone`] (UTC unless [`Calendar::with_timezone`] is used), and local
//! times that fall in a daylight-saving gap resolve to the first instant after
//! the gap.
//!
//! On the first step a `now` that already sits inside a matching unit fires
//! at the start of that unit; later steps always move on to the next match.
//! The delay interval covers the whole matching unit, so intersecting field
//! schedules (minute 30 *and* second 0) meets inside it.

use super::interval::{Interval, Intervals};
use super::schedule::{Decision, Schedule, Step};
use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveDateTime,
    TimeZone, Timelike, Utc,
};
use std::marker::PhantomData;
use thiserror::Error;

/// A calendar schedule argument was out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid argument in: {function}({value}). Must be in range {range}")]
pub struct IllegalArgument {
    function: &'static str,
    value: u32,
    range: &'static str,
}

impl IllegalArgument {
    /// Name of the rejected constructor.
    #[must_use]
    pub const fn function(&self) -> &'static str {
        self.function
    }

    /// The rejected value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.value
    }
}

/// The calendar field a [`Calendar`] schedule matches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    /// Second within the minute, `0..=59`.
    SecondOfMinute(u32),
    /// Minute within the hour, `0..=59`.
    MinuteOfHour(u32),
    /// Hour within the day, `0..=23`.
    HourOfDay(u32),
    /// Day of the week, `1` (Monday) to `7` (Sunday).
    DayOfWeek(u32),
    /// Day of the month, `1..=31`.
    DayOfMonth(u32),
}

impl Field {
    fn validate(self) -> Result<Self, IllegalArgument> {
        let (function, value, ok, range) = match self {
            Self::SecondOfMinute(v) => ("secondOfMinute", v, v <= 59, "0...59"),
            Self::MinuteOfHour(v) => ("minuteOfHour", v, v <= 59, "0...59"),
            Self::HourOfDay(v) => ("hourOfDay", v, v <= 23, "0...23"),
            Self::DayOfWeek(v) => (
                "dayOfWeek",
                v,
                (1..=7).contains(&v),
                "1 (Monday)...7 (Sunday)",
            ),
            Self::DayOfMonth(v) => ("dayOfMonth", v, (1..=31).contains(&v), "1...31"),
        };
        if ok {
            Ok(self)
        } else {
            Err(IllegalArgument {
                function,
                value,
                range,
            })
        }
    }
}

/// Recurs at the start of each calendar unit matching a [`Field`].
pub struct Calendar<In, Tz: TimeZone = Utc> {
    field: Field,
    tz: Tz,
    _in: PhantomData<fn(&In)>,
}

impl<In, Tz: TimeZone> std::fmt::Debug for Calendar<In, Tz> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calendar").field("field", &self.field).finish()
    }
}

impl<In> Calendar<In, Utc> {
    /// Builds a UTC schedule, validating the field.
    pub fn try_new(field: Field) -> Result<Self, IllegalArgument> {
        Ok(Self {
            field: field.validate()?,
            tz: Utc,
            _in: PhantomData,
        })
    }

    fn new_or_panic(field: Field) -> Self {
        match Self::try_new(field) {
            Ok(schedule) => schedule,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<In, Tz: TimeZone> Calendar<In, Tz> {
    /// Evaluates the same field in another time zone.
    pub fn with_timezone<Tz2: TimeZone>(self, tz: Tz2) -> Calendar<In, Tz2> {
        Calendar {
            field: self.field,
            tz,
            _in: PhantomData,
        }
    }

    /// The matched field.
    pub const fn field(&self) -> Field {
        self.field
    }
}

/// Recurs at second `second` of every minute.
///
/// # Panics
///
/// Panics with `Invalid argument in: secondOfMinute(60). Must be in range
/// 0...59` when out of range. Inside an effect the panic becomes a defect.
#[must_use]
pub fn second_of_minute<In>(second: u32) -> Calendar<In> {
    Calendar::new_or_panic(Field::SecondOfMinute(second))
}

/// Fallible form of [`second_of_minute`].
pub fn try_second_of_minute<In>(second: u32) -> Result<Calendar<In>, IllegalArgument> {
    Calendar::try_new(Field::SecondOfMinute(second))
}

/// Recurs at minute `minute` of every hour. Panics when out of range.
#[must_use]
pub fn minute_of_hour<In>(minute: u32) -> Calendar<In> {
    Calendar::new_or_panic(Field::MinuteOfHour(minute))
}

/// Fallible form of [`minute_of_hour`].
pub fn try_minute_of_hour<In>(minute: u32) -> Result<Calendar<In>, IllegalArgument> {
    Calendar::try_new(Field::MinuteOfHour(minute))
}

/// Recurs at hour `hour` of every day. Panics when out of range.
#[must_use]
pub fn hour_of_day<In>(hour: u32) -> Calendar<In> {
    Calendar::new_or_panic(Field::HourOfDay(hour))
}

/// Fallible form of [`hour_of_day`].
pub fn try_hour_of_day<In>(hour: u32) -> Result<Calendar<In>, IllegalArgument> {
    Calendar::try_new(Field::HourOfDay(hour))
}

/// Recurs on weekday `day` (1 = Monday, 7 = Sunday). Panics when out of range.
#[must_use]
pub fn day_of_week<In>(day: u32) -> Calendar<In> {
    Calendar::new_or_panic(Field::DayOfWeek(day))
}

/// Fallible form of [`day_of_week`].
pub fn try_day_of_week<In>(day: u32) -> Result<Calendar<In>, IllegalArgument> {
    Calendar::try_new(Field::DayOfWeek(day))
}

/// Recurs on day `day` of every month that has it. Months without that day
/// are skipped. Panics when out of range.
#[must_use]
pub fn day_of_month<In>(day: u32) -> Calendar<In> {
    Calendar::new_or_panic(Field::DayOfMonth(day))
}

/// Fallible form of [`day_of_month`].
pub fn try_day_of_month<In>(day: u32) -> Result<Calendar<In>, IllegalArgument> {
    Calendar::try_new(Field::DayOfMonth(day))
}

fn trunc_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.date()
        .and_hms_opt(t.hour(), t.minute(), 0)
        .unwrap_or(t)
}

fn trunc_hour(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_hms_opt(t.hour(), 0, 0).unwrap_or(t)
}

fn midnight(d: NaiveDate) -> NaiveDateTime {
    d.and_hms_opt(0, 0, 0).unwrap_or_default()
}

fn add(t: NaiveDateTime, d: ChronoDuration) -> NaiveDateTime {
    t.checked_add_signed(d).unwrap_or(NaiveDateTime::MAX)
}

/// First `(year, month)` from the month after `date` on which `day` exists.
fn next_month_with_day(date: NaiveDate, day: u32) -> NaiveDate {
    let (mut year, mut month) = (date.year(), date.month());
    loop {
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
        if let Some(found) = NaiveDate::from_ymd_opt(year, month, day) {
            return found;
        }
    }
}

/// Start and end of the next matching unit, in local wall-clock time.
fn next_unit(field: Field, now: NaiveDateTime, initial: bool) -> (NaiveDateTime, NaiveDateTime) {
    let second = ChronoDuration::seconds(1);
    let minute = ChronoDuration::minutes(1);
    let hour = ChronoDuration::hours(1);
    let day = ChronoDuration::days(1);
    match field {
        Field::SecondOfMinute(target) => {
            let begin = if now.second() == target && initial {
                now.with_nanosecond(0).unwrap_or(now)
            } else if now.second() < target {
                add(trunc_minute(now), ChronoDuration::seconds(i64::from(target)))
            } else {
                add(trunc_minute(now), minute + ChronoDuration::seconds(i64::from(target)))
            };
            (begin, add(begin, second))
        }
        Field::MinuteOfHour(target) => {
            let begin = if now.minute() == target && initial {
                trunc_minute(now)
            } else if now.minute() < target {
                add(trunc_hour(now), ChronoDuration::minutes(i64::from(target)))
            } else {
                add(trunc_hour(now), hour + ChronoDuration::minutes(i64::from(target)))
            };
            (begin, add(begin, minute))
        }
        Field::HourOfDay(target) => {
            let today = midnight(now.date());
            let begin = if now.hour() == target && initial {
                trunc_hour(now)
            } else if now.hour() < target {
                add(today, ChronoDuration::hours(i64::from(target)))
            } else {
                add(today, day + ChronoDuration::hours(i64::from(target)))
            };
            (begin, add(begin, hour))
        }
        Field::DayOfWeek(target) => {
            let current = now.weekday().number_from_monday();
            let begin = if current == target && initial {
                midnight(now.date())
            } else {
                let ahead = (7 + target - current) % 7;
                let ahead = if ahead == 0 { 7 } else { ahead };
                add(midnight(now.date()), ChronoDuration::days(i64::from(ahead)))
            };
            (begin, add(begin, day))
        }
        Field::DayOfMonth(target) => {
            let date = now.date();
            let begin = if date.day() == target && initial {
                midnight(date)
            } else if date.day() < target {
                NaiveDate::from_ymd_opt(date.year(), date.month(), target)
                    .map_or_else(|| midnight(next_month_with_day(date, target)), midnight)
            } else {
                midnight(next_month_with_day(date, target))
            };
            (begin, add(begin, day))
        }
    }
}

/// Resolves a local time to an instant; times inside a DST gap move forward
/// to the first representable minute.
fn resolve<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    let mut candidate = local;
    for _ in 0..=24 * 60 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(t) => return Some(t),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => candidate = add(candidate, ChronoDuration::minutes(1)),
        }
    }
    None
}

impl<In, Tz> Schedule for Calendar<In, Tz>
where
    In: 'static,
    Tz: TimeZone + Send + Sync + 'static,
{
    type In = In;
    type State = u64;
    type Out = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, now: i64, _: &In, n: &u64) -> Step<u64, u64> {
        let Some(current) = self.tz.timestamp_millis_opt(now).earliest() else {
            return (*n, *n, Decision::Done);
        };
        let (begin, end) = next_unit(self.field, current.naive_local(), *n == 0);
        let decision = match (resolve(&self.tz, begin), resolve(&self.tz, end)) {
            (Some(b), Some(e)) => Decision::Continue(Intervals::single(Interval::new(
                b.timestamp_millis(),
                e.timestamp_millis(),
            ))),
            _ => Decision::Done,
        };
        (n + 1, *n, decision)
    }
}
