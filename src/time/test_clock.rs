//! Virtual time for deterministic tests.
//!
//! A [`TestClock`] starts at zero and only moves when a test calls
//! [`TestClock::adjust`] or [`TestClock::set_time`]. Before moving, the clock
//! waits until every other fiber of the runtime is suspended, so a fiber
//! that is about to call `sleep` cannot miss the adjustment. Sleepers whose
//! deadline falls inside the adjustment are then released one at a time,
//! earliest first, and the clock waits for the runtime to settle again
//! after each release.
//!
//! Two warnings guard against hanging tests. Both are logged and kept for
//! inspection through [`TestClock::warnings`]:
//! - a fiber sleeps on the test clock but nobody adjusts it
//! - an adjustment waits for a fiber that never suspends

use super::{Clock, LiveClock, TimerCallback, TimerHeap, TimerId};
use crate::effect::op::{Data, Op};
use crate::effect::{millis, on_exit_op, sleep_on, Effect};
use crate::runtime::{FiberStatus, RuntimeInner};
use crate::tracing_compat::{debug, warn};
use crate::types::FiberId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Logged when a fiber sleeps on the test clock and nobody advances it.
pub const SLEEP_WARNING: &str = "Warning: A test is using time, but is not advancing the test \
clock, which may result in the test hanging. Use TestClock::adjust to manually advance the time.";

/// Logged when an adjustment keeps waiting for a fiber to suspend.
pub const SUSPENDED_WARNING: &str = "Warning: A test is advancing the test clock, but a fiber is \
not suspending, which may result in the test hanging. Use Runtime::fiber_dump to identify the \
fiber that is not suspending.";

/// Real-time pause between two status snapshots.
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WarningState {
    Start,
    Pending(TimerId),
    Done,
}

struct TestState {
    now: i64,
    timers: TimerHeap,
    sleep_warning: WarningState,
    suspended_warning: WarningState,
}

type Snapshot = Option<BTreeMap<FiberId, FiberStatus>>;

/// A clock whose time is controlled by the test.
pub struct TestClock {
    state: Mutex<TestState>,
    live: Arc<LiveClock>,
    warning_delay: Duration,
    warnings: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for TestClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TestClock")
            .field("now", &state.now)
            .field("sleeps", &state.timers.len())
            .finish_non_exhaustive()
    }
}

impl TestClock {
    /// Creates a clock at time zero. `live` measures the real-time delays
    /// of the diagnostics.
    #[must_use]
    pub fn new(live: Arc<LiveClock>, warning_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TestState {
                now: 0,
                timers: TimerHeap::new(),
                sleep_warning: WarningState::Start,
                suspended_warning: WarningState::Start,
            }),
            live,
            warning_delay,
            warnings: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// The test clock of the runtime running the effect.
    ///
    /// Dies if the runtime uses the live clock.
    #[must_use]
    pub fn current<E: Data>() -> Effect<Arc<Self>, E> {
        Effect::from_op(Op::with_fiber(|scope| {
            match scope.fiber.runtime().test_clock() {
                Some(clock) => Op::Succeed(crate::effect::op::erase(clock)),
                None => Op::Fail(crate::types::Cause::die(
                    "the runtime is not configured with a test clock",
                )),
            }
        }))
    }

    /// Current virtual time in milliseconds.
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.state.lock().now
    }

    /// Deadlines of the pending sleeps, earliest first.
    #[must_use]
    pub fn pending_sleeps(&self) -> Vec<i64> {
        self.state.lock().timers.deadlines()
    }

    /// Warnings emitted so far.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    /// Moves time forward by `duration`, releasing the sleepers on the way.
    pub fn adjust<E: Data>(self: &Arc<Self>, duration: Duration) -> Effect<(), E> {
        let delta = millis(duration);
        self.run_to(Arc::new(move |now| now.saturating_add(delta)))
    }

    /// Sets the time to `millis`, releasing the sleepers due by then.
    pub fn set_time<E: Data>(self: &Arc<Self>, millis: i64) -> Effect<(), E> {
        self.run_to(Arc::new(move |_| millis))
    }

    /// Deadlines of the pending sleeps, as an effect.
    pub fn sleeps<E: Data>(self: &Arc<Self>) -> Effect<Vec<i64>, E> {
        let this = Arc::clone(self);
        Effect::sync(move || this.pending_sleeps())
    }

    /// Waits until every other fiber of the runtime is suspended and two
    /// consecutive status snapshots agree.
    pub fn await_suspended<E: Data>(self: &Arc<Self>) -> Effect<(), E> {
        Effect::from_op(self.await_suspended_op())
    }

    fn run_to<E: Data>(
        self: &Arc<Self>,
        target: Arc<dyn Fn(i64) -> i64 + Send + Sync>,
    ) -> Effect<(), E> {
        Effect::from_op(self.run_op(target))
    }

    fn run_op(self: &Arc<Self>, target: Arc<dyn Fn(i64) -> i64 + Send + Sync>) -> Op {
        let this = Arc::clone(self);
        Op::suspend(move || {
            this.sleep_warning_done();
            let release = Arc::clone(&this);
            let target = Arc::clone(&target);
            this.await_suspended_op().flat_map(move |_| {
                let end = target(release.now_millis());
                debug!(end, "test clock adjusting");
                release.release_until(end)
            })
        })
    }

    fn release_until(self: &Arc<Self>, end: i64) -> Op {
        let this = Arc::clone(self);
        Op::suspend(move || {
            let next = {
                let mut state = this.state.lock();
                match state.timers.pop_expired(end) {
                    Some((deadline, callback)) => {
                        state.now = deadline;
                        Some(callback)
                    }
                    None => {
                        state.now = end;
                        None
                    }
                }
            };
            match next {
                Some(callback) => {
                    callback();
                    let again = Arc::clone(&this);
                    Op::Yield
                        .flat_map({
                            let this = Arc::clone(&this);
                            move |_| this.await_suspended_op()
                        })
                        .flat_map(move |_| again.release_until(end))
                }
                None => Op::unit(),
            }
        })
    }

    fn await_suspended_op(self: &Arc<Self>) -> Op {
        let this = Arc::clone(self);
        let body = Op::with_fiber(move |scope| {
            let runtime = Arc::clone(scope.fiber.runtime());
            let me = scope.fiber.id().clone();
            this.suspended_warning_start();
            poll_suspended(Arc::clone(&this.live), runtime, me, None)
        });
        let this = Arc::clone(self);
        on_exit_op(
            body,
            Arc::new(move |_| {
                let this = Arc::clone(&this);
                Op::sync(move || {
                    this.suspended_warning_done();
                    Ok(crate::effect::op::erase(()))
                })
            }),
        )
    }

    fn schedule_warning(&self, message: &'static str) -> TimerId {
        let warnings = Arc::clone(&self.warnings);
        let deadline = self
            .live
            .current_time_millis()
            .saturating_add(millis(self.warning_delay));
        self.live.register_timer(
            deadline,
            Box::new(move || {
                warn!("{message}");
                warnings.lock().push(message.to_string());
            }),
        )
    }

    fn sleep_warning_start(&self, state: &mut TestState) {
        if state.sleep_warning == WarningState::Start {
            state.sleep_warning = WarningState::Pending(self.schedule_warning(SLEEP_WARNING));
        }
    }

    fn sleep_warning_done(&self) {
        let mut state = self.state.lock();
        if let WarningState::Pending(id) = state.sleep_warning {
            self.live.cancel_timer(id);
        }
        state.sleep_warning = WarningState::Done;
    }

    fn suspended_warning_start(&self) {
        let mut state = self.state.lock();
        if state.suspended_warning == WarningState::Start {
            state.suspended_warning =
                WarningState::Pending(self.schedule_warning(SUSPENDED_WARNING));
        }
    }

    fn suspended_warning_done(&self) {
        let mut state = self.state.lock();
        if let WarningState::Pending(id) = state.suspended_warning {
            self.live.cancel_timer(id);
            state.suspended_warning = WarningState::Start;
        }
    }
}

fn poll_suspended(
    live: Arc<LiveClock>,
    runtime: Arc<RuntimeInner>,
    me: FiberId,
    previous: Snapshot,
) -> Op {
    Op::suspend(move || {
        let current = runtime.suspended_snapshot(&me);
        if let (Some(now), Some(before)) = (&current, &previous) {
            if now == before {
                return Op::unit();
            }
        }
        let (live, runtime, me) = (Arc::clone(&live), Arc::clone(&runtime), me.clone());
        sleep_on(Arc::clone(&live) as Arc<dyn Clock>, SNAPSHOT_INTERVAL).flat_map(move |_| {
            poll_suspended(
                Arc::clone(&live),
                Arc::clone(&runtime),
                me.clone(),
                current.clone(),
            )
        })
    })
}

impl Clock for TestClock {
    fn current_time_millis(&self) -> i64 {
        self.now_millis()
    }

    fn register_timer(&self, deadline_millis: i64, callback: TimerCallback) -> TimerId {
        let mut state = self.state.lock();
        if deadline_millis <= state.now {
            let id = state.timers.reserve_id();
            drop(state);
            callback();
            return id;
        }
        self.sleep_warning_start(&mut state);
        state.timers.insert(deadline_millis, callback)
    }

    fn cancel_timer(&self, id: TimerId) -> bool {
        self.state.lock().timers.cancel(id)
    }

    fn clear_timers(&self) -> usize {
        let mut state = self.state.lock();
        for warning in [state.sleep_warning, state.suspended_warning] {
            if let WarningState::Pending(id) = warning {
                self.live.cancel_timer(id);
            }
        }
        state.timers.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clock(delay: Duration) -> Arc<TestClock> {
        TestClock::new(LiveClock::start("test-clock").expect("live clock"), delay)
    }

    #[test]
    fn starts_at_zero_and_records_sleeps() {
        let clock = clock(Duration::from_secs(5));
        assert_eq!(clock.now_millis(), 0);
        clock.register_timer(30, Box::new(|| {}));
        clock.register_timer(10, Box::new(|| {}));
        assert_eq!(clock.pending_sleeps(), vec![10, 30]);
    }

    #[test]
    fn due_timer_fires_immediately() {
        let clock = clock(Duration::from_secs(5));
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        clock.register_timer(0, Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(clock.pending_sleeps().is_empty());
    }

    #[test]
    fn cancel_removes_sleep() {
        let clock = clock(Duration::from_secs(5));
        let id = clock.register_timer(100, Box::new(|| {}));
        assert!(clock.cancel_timer(id));
        assert!(clock.pending_sleeps().is_empty());
    }

    #[test]
    fn sleep_without_adjust_warns() {
        let clock = clock(Duration::from_millis(20));
        clock.register_timer(1_000, Box::new(|| {}));
        let start = std::time::Instant::now();
        while clock.warnings().is_empty() && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(clock.warnings(), vec![SLEEP_WARNING.to_string()]);
    }

    #[test]
    fn adjust_marks_sleep_warning_done() {
        let clock = clock(Duration::from_millis(20));
        clock.register_timer(1_000, Box::new(|| {}));
        clock.sleep_warning_done();
        std::thread::sleep(Duration::from_millis(80));
        assert!(clock.warnings().is_empty());
        clock.register_timer(2_000, Box::new(|| {}));
        std::thread::sleep(Duration::from_millis(80));
        assert!(clock.warnings().is_empty());
    }
}
