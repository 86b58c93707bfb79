//! Clocks and timers.
//!
//! Fibers never read the host clock directly. [`Effect::sleep`] and
//! [`Effect::current_time_millis`] go through the runtime's [`Clock`], which
//! is either:
//! - [`LiveClock`]: wall-clock milliseconds plus a timer driver thread
//! - [`TestClock`]: virtual time that only moves when a test advances it
//!
//! A sleeping fiber registers a timer whose callback resumes it, so waiting
//! never holds a worker thread. Interrupting the sleep cancels the timer.
//!
//! [`Effect::sleep`]: crate::Effect::sleep
//! [`Effect::current_time_millis`]: crate::Effect::current_time_millis

mod heap;
mod live;
mod test_clock;

pub use live::LiveClock;
pub use test_clock::TestClock;

pub(crate) use heap::TimerHeap;

/// Callback fired when a timer's deadline passes.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Identifies a registered timer for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// A source of time and timers.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn current_time_millis(&self) -> i64;

    /// Runs `callback` once the clock reaches `deadline_millis`.
    fn register_timer(&self, deadline_millis: i64, callback: TimerCallback) -> TimerId;

    /// Cancels a pending timer. Returns `false` if it already fired.
    fn cancel_timer(&self, id: TimerId) -> bool;

    /// Drops every pending timer without firing it.
    fn clear_timers(&self) -> usize;
}
