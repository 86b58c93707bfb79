//! Recurrence schedules and interval arithmetic.
//!
//! - [`interval`]: half-open intervals and normalised interval sets
//! - [`schedule`]: the [`Schedule`] trait, constructors and combinators
//! - [`cron`]: calendar-field schedules (second of minute, day of month, ...)
//!
//! Schedules are pure; the effect layer turns their decisions into sleeps
//! (see [`Effect::retry`](crate::effect::Effect::retry) and
//! [`Effect::repeat`](crate::effect::Effect::repeat)).

pub mod cron;
pub mod interval;
#[allow(clippy::module_inception)]
pub mod schedule;

pub use cron::{
    day_of_month, day_of_week, hour_of_day, minute_of_hour, second_of_minute, try_day_of_month,
    try_day_of_week, try_hour_of_day, try_minute_of_hour, try_second_of_minute, Calendar, Field,
    IllegalArgument,
};
pub use interval::{Interval, Intervals, END_OF_TIME};
pub use schedule::{
    elapsed, exponential, fibonacci, fixed, forever, linear, once, recurs, run, run_manually,
    spaced, stop, Decision, Driver, Schedule, ScheduleExt, Step, MAX_INTERSECT_STEPS,
};
