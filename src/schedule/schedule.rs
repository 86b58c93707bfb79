//! The [`Schedule`] trait and its constructors and combinators.
//!
//! A schedule is a pure step function. Given the current time, the latest
//! input (an error for retries, a value for repeats) and its own state, it
//! returns a new state, an output and a [`Decision`]. Nothing in here reads a
//! clock: `now` is always passed in, so every schedule can be driven by a
//! virtual clock or stepped by hand in tests.
//!
//! # Design Philosophy
//!
//! Combinators build new step functions out of old ones, the way iterator
//! adaptors build iterators. State is an immutable value returned from each
//! step, never a hidden counter, so a schedule can be restarted by going back
//! to [`Schedule::initial`].

use super::interval::{Interval, Intervals, END_OF_TIME};
use crate::util::DetRng;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on re-steps while two schedules look for a common window.
pub const MAX_INTERSECT_STEPS: usize = 10_000;

/// What a schedule wants to happen next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Recur at some instant inside the given intervals.
    Continue(Intervals),
    /// Stop recurring.
    Done,
}

impl Decision {
    /// Continue inside a single interval.
    #[must_use]
    pub fn continue_with(interval: Interval) -> Self {
        Self::Continue(Intervals::single(interval))
    }

    /// Returns `true` for [`Decision::Done`].
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Earliest recurrence instant, if the schedule continues.
    #[must_use]
    pub fn next_millis(&self) -> Option<i64> {
        match self {
            Self::Continue(intervals) => Some(intervals.start()),
            Self::Done => None,
        }
    }

    /// How long to wait from `now` until the next recurrence.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn delay_from(&self, now: i64) -> Option<Duration> {
        self.next_millis()
            .map(|next| Duration::from_millis(next.saturating_sub(now).max(0) as u64))
    }
}

/// Result of one schedule step: new state, output, decision.
pub type Step<S, O> = (S, O, Decision);

/// A pure recurrence policy.
pub trait Schedule: Send + Sync + 'static {
    /// Input fed to each step.
    type In;
    /// State threaded between steps.
    type State: Clone + Send + Sync + 'static;
    /// Output produced by each step.
    type Out: Clone + Send + Sync + 'static;

    /// The state before the first step.
    fn initial(&self) -> Self::State;

    /// Advances the schedule by one recurrence.
    fn step(&self, now: i64, input: &Self::In, state: &Self::State)
        -> Step<Self::State, Self::Out>;
}

impl<S: Schedule + ?Sized> Schedule for Arc<S> {
    type In = S::In;
    type State = S::State;
    type Out = S::Out;

    fn initial(&self) -> Self::State {
        (**self).initial()
    }

    fn step(&self, now: i64, input: &Self::In, state: &Self::State) -> Step<Self::State, Self::Out> {
        (**self).step(now, input, state)
    }
}

#[allow(clippy::cast_possible_wrap)]
fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(END_OF_TIME)
}

fn input_marker<In>() -> PhantomData<fn(&In)> {
    PhantomData
}

// ============================================================================
// Constructors
// ============================================================================

/// Recurs forever without delay, outputting the number of recurrences so far.
pub struct Forever<In> {
    _in: PhantomData<fn(&In)>,
}

/// Recurs forever without delay.
#[must_use]
pub fn forever<In>() -> Forever<In> {
    Forever { _in: input_marker() }
}

impl<In: 'static> Schedule for Forever<In> {
    type In = In;
    type State = u64;
    type Out = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, now: i64, _: &In, n: &u64) -> Step<u64, u64> {
        (n + 1, *n, Decision::Continue(Intervals::after(now)))
    }
}

/// Recurs `times` times without delay.
pub struct Recurs<In> {
    times: u64,
    _in: PhantomData<fn(&In)>,
}

/// Recurs `times` times, outputting the recurrence count.
#[must_use]
pub fn recurs<In>(times: u64) -> Recurs<In> {
    Recurs {
        times,
        _in: input_marker(),
    }
}

/// Recurs exactly once.
#[must_use]
pub fn once<In>() -> Recurs<In> {
    recurs(1)
}

/// Never recurs.
#[must_use]
pub fn stop<In>() -> Recurs<In> {
    recurs(0)
}

impl<In: 'static> Schedule for Recurs<In> {
    type In = In;
    type State = u64;
    type Out = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, now: i64, _: &In, n: &u64) -> Step<u64, u64> {
        let decision = if *n < self.times {
            Decision::Continue(Intervals::after(now))
        } else {
            Decision::Done
        };
        (n + 1, *n, decision)
    }
}

/// Recurs forever with a fixed pause between runs.
pub struct Spaced<In> {
    every: Duration,
    _in: PhantomData<fn(&In)>,
}

/// Waits `every` after each run, outputting the recurrence count.
#[must_use]
pub fn spaced<In>(every: Duration) -> Spaced<In> {
    Spaced {
        every,
        _in: input_marker(),
    }
}

impl<In: 'static> Schedule for Spaced<In> {
    type In = In;
    type State = u64;
    type Out = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, now: i64, _: &In, n: &u64) -> Step<u64, u64> {
        let next = now.saturating_add(millis(self.every));
        (n + 1, *n, Decision::Continue(Intervals::after(next)))
    }
}

/// State of a [`Fixed`] schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedState {
    start: Option<(i64, i64)>,
    count: u64,
}

/// Recurs on a fixed grid of period boundaries measured from the first run.
pub struct Fixed<In> {
    period: Duration,
    _in: PhantomData<fn(&In)>,
}

/// Recurs on fixed period boundaries. A run that overruns the boundary
/// recurs immediately, then snaps back onto the grid.
#[must_use]
pub fn fixed<In>(period: Duration) -> Fixed<In> {
    Fixed {
        period,
        _in: input_marker(),
    }
}

impl<In: 'static> Schedule for Fixed<In> {
    type In = In;
    type State = FixedState;
    type Out = u64;

    fn initial(&self) -> FixedState {
        FixedState {
            start: None,
            count: 0,
        }
    }

    fn step(&self, now: i64, _: &In, state: &FixedState) -> Step<FixedState, u64> {
        let period = millis(self.period);
        let n = state.count;
        match state.start {
            None => {
                let next = now.saturating_add(period);
                (
                    FixedState {
                        start: Some((now, next)),
                        count: n + 1,
                    },
                    n,
                    Decision::Continue(Intervals::after(next)),
                )
            }
            Some((start, last_run)) => {
                let running_behind = now > last_run.saturating_add(period);
                let boundary = if period == 0 {
                    0
                } else {
                    period - (now - start).rem_euclid(period)
                };
                let sleep = if boundary == 0 { period } else { boundary };
                let next = if running_behind {
                    now
                } else {
                    now.saturating_add(sleep)
                };
                (
                    FixedState {
                        start: Some((start, next)),
                        count: n + 1,
                    },
                    n,
                    Decision::Continue(Intervals::after(next)),
                )
            }
        }
    }
}

/// Delay that grows with every recurrence.
#[derive(Clone, Copy, Debug)]
enum Growth {
    Exponential { base: Duration, factor: f64 },
    Linear { base: Duration },
}

/// Recurs forever, waiting the output duration each time.
pub struct Backoff<In> {
    growth: Growth,
    _in: PhantomData<fn(&In)>,
}

/// Waits `base * factor^n` before recurrence `n`, outputting that delay.
#[must_use]
pub fn exponential<In>(base: Duration, factor: f64) -> Backoff<In> {
    Backoff {
        growth: Growth::Exponential { base, factor },
        _in: input_marker(),
    }
}

/// Waits `base * (n + 1)` before recurrence `n`, outputting that delay.
#[must_use]
pub fn linear<In>(base: Duration) -> Backoff<In> {
    Backoff {
        growth: Growth::Linear { base },
        _in: input_marker(),
    }
}

impl<In: 'static> Schedule for Backoff<In> {
    type In = In;
    type State = u64;
    type Out = Duration;

    fn initial(&self) -> u64 {
        0
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn step(&self, now: i64, _: &In, n: &u64) -> Step<u64, Duration> {
        let delay = match self.growth {
            Growth::Exponential { base, factor } => {
                let exp = i32::try_from(*n).unwrap_or(i32::MAX);
                Duration::try_from_secs_f64(base.as_secs_f64() * factor.powi(exp))
                    .unwrap_or(Duration::MAX)
            }
            Growth::Linear { base } => base.saturating_mul(u32::try_from(n + 1).unwrap_or(u32::MAX)),
        };
        let next = now.saturating_add(millis(delay));
        (n + 1, delay, Decision::Continue(Intervals::after(next)))
    }
}

/// Fibonacci delays.
pub struct Fibonacci<In> {
    one: Duration,
    _in: PhantomData<fn(&In)>,
}

/// Waits `one, one, 2*one, 3*one, 5*one, ...`, outputting each delay.
#[must_use]
pub fn fibonacci<In>(one: Duration) -> Fibonacci<In> {
    Fibonacci {
        one,
        _in: input_marker(),
    }
}

impl<In: 'static> Schedule for Fibonacci<In> {
    type In = In;
    type State = (Duration, Duration);
    type Out = Duration;

    fn initial(&self) -> (Duration, Duration) {
        (self.one, self.one)
    }

    fn step(&self, now: i64, _: &In, &(a, b): &(Duration, Duration)) -> Step<Self::State, Duration> {
        let next = now.saturating_add(millis(a));
        ((b, a.saturating_add(b)), a, Decision::Continue(Intervals::after(next)))
    }
}

/// Recurs forever, outputting the time elapsed since the first step.
pub struct Elapsed<In> {
    _in: PhantomData<fn(&In)>,
}

/// Recurs forever, outputting the time elapsed since the first step.
#[must_use]
pub fn elapsed<In>() -> Elapsed<In> {
    Elapsed { _in: input_marker() }
}

impl<In: 'static> Schedule for Elapsed<In> {
    type In = In;
    type State = Option<i64>;
    type Out = Duration;

    fn initial(&self) -> Option<i64> {
        None
    }

    #[allow(clippy::cast_sign_loss)]
    fn step(&self, now: i64, _: &In, start: &Option<i64>) -> Step<Option<i64>, Duration> {
        let start = start.unwrap_or(now);
        let spent = Duration::from_millis(now.saturating_sub(start).max(0) as u64);
        (Some(start), spent, Decision::Continue(Intervals::after(now)))
    }
}

// ============================================================================
// Combinators
// ============================================================================

/// Fires only when both schedules fire. See [`ScheduleExt::intersect`].
pub struct Intersect<L, R> {
    left: L,
    right: R,
}

impl<L, R> Schedule for Intersect<L, R>
where
    L: Schedule,
    R: Schedule<In = L::In>,
{
    type In = L::In;
    type State = (L::State, R::State);
    type Out = (L::Out, R::Out);

    fn initial(&self) -> Self::State {
        (self.left.initial(), self.right.initial())
    }

    fn step(&self, now: i64, input: &L::In, state: &Self::State) -> Step<Self::State, Self::Out> {
        let (mut ls, mut lo, mut ld) = self.left.step(now, input, &state.0);
        let (mut rs, mut ro, mut rd) = self.right.step(now, input, &state.1);
        for _ in 0..MAX_INTERSECT_STEPS {
            let (Decision::Continue(li), Decision::Continue(ri)) = (&ld, &rd) else {
                return ((ls, rs), (lo, ro), Decision::Done);
            };
            let combined = li.intersect(ri);
            if !combined.is_empty() {
                return ((ls, rs), (lo, ro), Decision::Continue(combined));
            }
            if li.less_than(ri) {
                let at = li.end();
                (ls, lo, ld) = self.left.step(at, input, &ls);
            } else {
                let at = ri.end();
                (rs, ro, rd) = self.right.step(at, input, &rs);
            }
        }
        ((ls, rs), (lo, ro), Decision::Done)
    }
}

/// Fires when either schedule fires. See [`ScheduleExt::union`].
pub struct Union<L, R> {
    left: L,
    right: R,
}

impl<L, R> Schedule for Union<L, R>
where
    L: Schedule,
    R: Schedule<In = L::In>,
{
    type In = L::In;
    type State = (L::State, R::State);
    type Out = (L::Out, R::Out);

    fn initial(&self) -> Self::State {
        (self.left.initial(), self.right.initial())
    }

    fn step(&self, now: i64, input: &L::In, state: &Self::State) -> Step<Self::State, Self::Out> {
        let (ls, lo, ld) = self.left.step(now, input, &state.0);
        let (rs, ro, rd) = self.right.step(now, input, &state.1);
        let decision = match (ld, rd) {
            (Decision::Continue(l), Decision::Continue(r)) => Decision::Continue(l.union(&r)),
            (Decision::Continue(l), Decision::Done) => Decision::Continue(l),
            (Decision::Done, Decision::Continue(r)) => Decision::Continue(r),
            (Decision::Done, Decision::Done) => Decision::Done,
        };
        ((ls, rs), (lo, ro), decision)
    }
}

/// Which half of an [`AndThen`] is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Running the first schedule.
    First,
    /// Running the second schedule.
    Second,
}

/// Runs one schedule to completion, then another.
pub struct AndThen<L, R> {
    first: L,
    second: R,
}

impl<L, R> Schedule for AndThen<L, R>
where
    L: Schedule,
    R: Schedule<In = L::In, Out = L::Out>,
{
    type In = L::In;
    type State = (Phase, L::State, R::State);
    type Out = L::Out;

    fn initial(&self) -> Self::State {
        (Phase::First, self.first.initial(), self.second.initial())
    }

    fn step(&self, now: i64, input: &L::In, state: &Self::State) -> Step<Self::State, Self::Out> {
        let (phase, ls, rs) = state;
        if *phase == Phase::First {
            let (ls2, out, decision) = self.first.step(now, input, ls);
            if !decision.is_done() {
                return ((Phase::First, ls2, rs.clone()), out, decision);
            }
        }
        let (rs2, out, decision) = self.second.step(now, input, rs);
        ((Phase::Second, ls.clone(), rs2), out, decision)
    }
}

/// Maps schedule outputs.
pub struct Map<S, F> {
    inner: S,
    f: F,
}

impl<S, F, B> Schedule for Map<S, F>
where
    S: Schedule,
    F: Fn(S::Out) -> B + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    type In = S::In;
    type State = S::State;
    type Out = B;

    fn initial(&self) -> S::State {
        self.inner.initial()
    }

    fn step(&self, now: i64, input: &S::In, state: &S::State) -> Step<S::State, B> {
        let (s, out, decision) = self.inner.step(now, input, state);
        (s, (self.f)(out), decision)
    }
}

/// Stops as soon as a predicate on the input or output fails.
pub struct While<S, P> {
    inner: S,
    on_input: bool,
    pred: P,
}

/// Predicate over either the input or the output of a schedule.
pub trait StepPredicate<In, Out>: Send + Sync + 'static {
    /// Evaluated against the input when `on_input`, else against the output.
    fn test(&self, on_input: bool, input: &In, output: &Out) -> bool;
}

/// Input predicate.
pub struct InputPred<F>(F);
/// Output predicate.
pub struct OutputPred<F>(F);

impl<In, Out, F> StepPredicate<In, Out> for InputPred<F>
where
    F: Fn(&In) -> bool + Send + Sync + 'static,
{
    fn test(&self, _: bool, input: &In, _: &Out) -> bool {
        (self.0)(input)
    }
}

impl<In, Out, F> StepPredicate<In, Out> for OutputPred<F>
where
    F: Fn(&Out) -> bool + Send + Sync + 'static,
{
    fn test(&self, _: bool, _: &In, output: &Out) -> bool {
        (self.0)(output)
    }
}

impl<S, P> Schedule for While<S, P>
where
    S: Schedule,
    P: StepPredicate<S::In, S::Out>,
{
    type In = S::In;
    type State = S::State;
    type Out = S::Out;

    fn initial(&self) -> S::State {
        self.inner.initial()
    }

    fn step(&self, now: i64, input: &S::In, state: &S::State) -> Step<S::State, S::Out> {
        let (s, out, decision) = self.inner.step(now, input, state);
        if decision.is_done() || !self.pred.test(self.on_input, input, &out) {
            (s, out, Decision::Done)
        } else {
            (s, out, decision)
        }
    }
}

/// Stops once a time budget measured from the first step is spent.
pub struct UpTo<S> {
    inner: S,
    budget: Duration,
}

impl<S: Schedule> Schedule for UpTo<S> {
    type In = S::In;
    type State = (Option<i64>, S::State);
    type Out = S::Out;

    fn initial(&self) -> Self::State {
        (None, self.inner.initial())
    }

    fn step(&self, now: i64, input: &S::In, state: &Self::State) -> Step<Self::State, S::Out> {
        let start = state.0.unwrap_or(now);
        let (s, out, decision) = self.inner.step(now, input, &state.1);
        let within = now.saturating_sub(start) < millis(self.budget);
        let decision = if within { decision } else { Decision::Done };
        ((Some(start), s), out, decision)
    }
}

fn shift(now: i64, intervals: &Intervals, delay: Duration) -> Intervals {
    let start = now.saturating_add(millis(delay));
    let end = if intervals.end() == END_OF_TIME {
        END_OF_TIME
    } else {
        start.saturating_add(intervals.end().saturating_sub(intervals.start()))
    };
    Intervals::single(Interval::new(start, end))
}

#[allow(clippy::cast_sign_loss)]
fn current_delay(now: i64, intervals: &Intervals) -> Duration {
    Duration::from_millis(intervals.start().saturating_sub(now).max(0) as u64)
}

/// Adds an output-dependent delay on top of the inner delay.
pub struct AddDelay<S, F> {
    inner: S,
    f: F,
}

impl<S, F> Schedule for AddDelay<S, F>
where
    S: Schedule,
    F: Fn(&S::Out) -> Duration + Send + Sync + 'static,
{
    type In = S::In;
    type State = S::State;
    type Out = S::Out;

    fn initial(&self) -> S::State {
        self.inner.initial()
    }

    fn step(&self, now: i64, input: &S::In, state: &S::State) -> Step<S::State, S::Out> {
        let (s, out, decision) = self.inner.step(now, input, state);
        let decision = match decision {
            Decision::Continue(intervals) => {
                let delay = current_delay(now, &intervals).saturating_add((self.f)(&out));
                Decision::Continue(shift(now, &intervals, delay))
            }
            Decision::Done => Decision::Done,
        };
        (s, out, decision)
    }
}

/// Scales every delay by a random factor in `[min, max)`.
pub struct Jittered<S> {
    inner: S,
    min: f64,
    max: f64,
    seed: u64,
}

impl<S: Schedule> Schedule for Jittered<S> {
    type In = S::In;
    type State = (S::State, DetRng);
    type Out = S::Out;

    fn initial(&self) -> Self::State {
        (self.inner.initial(), DetRng::new(self.seed))
    }

    fn step(&self, now: i64, input: &S::In, state: &Self::State) -> Step<Self::State, S::Out> {
        let (s, out, decision) = self.inner.step(now, input, &state.0);
        let mut rng = state.1.clone();
        let decision = match decision {
            Decision::Continue(intervals) => {
                let factor = rng.next_f64_range(self.min, self.max);
                let delay = current_delay(now, &intervals).mul_f64(factor);
                Decision::Continue(shift(now, &intervals, delay))
            }
            Decision::Done => Decision::Done,
        };
        ((s, rng), out, decision)
    }
}

/// Combinators available on every [`Schedule`].
pub trait ScheduleExt: Schedule + Sized {
    /// Recurs only when both schedules want to, at instants both allow.
    ///
    /// When the two delay sets do not overlap, the schedule whose window
    /// starts first is stepped again from the end of that window, up to
    /// [`MAX_INTERSECT_STEPS`] times.
    fn intersect<R: Schedule<In = Self::In>>(self, that: R) -> Intersect<Self, R> {
        Intersect {
            left: self,
            right: that,
        }
    }

    /// Recurs when either schedule wants to.
    fn union<R: Schedule<In = Self::In>>(self, that: R) -> Union<Self, R> {
        Union {
            left: self,
            right: that,
        }
    }

    /// Runs `self` until done, then `that`.
    fn and_then<R: Schedule<In = Self::In, Out = Self::Out>>(self, that: R) -> AndThen<Self, R> {
        AndThen {
            first: self,
            second: that,
        }
    }

    /// Transforms each output.
    fn map<B, F>(self, f: F) -> Map<Self, F>
    where
        F: Fn(Self::Out) -> B + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
    {
        Map { inner: self, f }
    }

    /// Continues only while the input satisfies `pred`.
    fn while_input<F>(self, pred: F) -> While<Self, InputPred<F>>
    where
        F: Fn(&Self::In) -> bool + Send + Sync + 'static,
    {
        While {
            inner: self,
            on_input: true,
            pred: InputPred(pred),
        }
    }

    /// Continues only while the output satisfies `pred`.
    fn while_output<F>(self, pred: F) -> While<Self, OutputPred<F>>
    where
        F: Fn(&Self::Out) -> bool + Send + Sync + 'static,
    {
        While {
            inner: self,
            on_input: false,
            pred: OutputPred(pred),
        }
    }

    /// Stops once `budget` has elapsed since the first step.
    fn up_to(self, budget: Duration) -> UpTo<Self> {
        UpTo {
            inner: self,
            budget,
        }
    }

    /// Adds `f(output)` to each delay.
    fn add_delay<F>(self, f: F) -> AddDelay<Self, F>
    where
        F: Fn(&Self::Out) -> Duration + Send + Sync + 'static,
    {
        AddDelay { inner: self, f }
    }

    /// Scales delays by a factor drawn from `[0.8, 1.2)`.
    fn jittered(self, seed: u64) -> Jittered<Self> {
        self.jittered_between(0.8, 1.2, seed)
    }

    /// Scales delays by a factor drawn from `[min, max)`.
    fn jittered_between(self, min: f64, max: f64, seed: u64) -> Jittered<Self> {
        Jittered {
            inner: self,
            min,
            max,
            seed,
        }
    }

    /// Wraps the schedule so it can be shared between effects.
    fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl<S: Schedule> ScheduleExt for S {}

// ============================================================================
// Manual stepping
// ============================================================================

/// Steps a schedule by hand, keeping its state between calls.
pub struct Driver<S: Schedule> {
    schedule: S,
    state: S::State,
    last: Option<S::Out>,
}

impl<S: Schedule> fmt::Debug for Driver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("has_output", &self.last.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: Schedule> Driver<S> {
    /// Starts a driver at the schedule's initial state.
    pub fn new(schedule: S) -> Self {
        let state = schedule.initial();
        Self {
            schedule,
            state,
            last: None,
        }
    }

    /// Steps once. Returns the output and the next recurrence instant, or
    /// `None` once the schedule is done.
    pub fn next(&mut self, now: i64, input: &S::In) -> Option<(S::Out, i64)> {
        let (state, out, decision) = self.schedule.step(now, input, &self.state);
        self.state = state;
        self.last = Some(out.clone());
        decision.next_millis().map(|at| (out, at))
    }

    /// The latest output.
    pub const fn last(&self) -> Option<&S::Out> {
        self.last.as_ref()
    }

    /// Returns to the initial state.
    pub fn reset(&mut self) {
        self.state = self.schedule.initial();
        self.last = None;
    }
}

/// Runs a schedule from `now` over `inputs`, moving `now` to each
/// recurrence start, and collects outputs until it is done.
pub fn run<S: Schedule>(schedule: &S, now: i64, inputs: impl IntoIterator<Item = S::In>) -> Vec<S::Out> {
    let mut state = schedule.initial();
    let mut now = now;
    let mut out = Vec::new();
    for input in inputs {
        let (next, o, decision) = schedule.step(now, &input, &state);
        out.push(o);
        match decision.next_millis() {
            Some(at) => {
                now = at;
                state = next;
            }
            None => break,
        }
    }
    out
}

/// Steps a schedule with explicit `(now, input)` pairs and collects the
/// `(next recurrence start, output)` of every step that continues.
pub fn run_manually<S: Schedule>(
    schedule: &S,
    inputs: impl IntoIterator<Item = (i64, S::In)>,
) -> Vec<(i64, S::Out)> {
    let mut state = schedule.initial();
    let mut out = Vec::new();
    for (now, input) in inputs {
        let (next, o, decision) = schedule.step(now, &input, &state);
        match decision.next_millis() {
            Some(at) => out.push((at, o)),
            None => break,
        }
        state = next;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays<S: Schedule<In = ()>>(schedule: &S, steps: usize) -> Vec<Option<Duration>> {
        let mut state = schedule.initial();
        let mut now = 0;
        let mut out = Vec::new();
        for _ in 0..steps {
            let (next, _, decision) = schedule.step(now, &(), &state);
            let delay = decision.delay_from(now);
            out.push(delay);
            if let Some(at) = decision.next_millis() {
                now = at;
            }
            state = next;
        }
        out
    }

    fn ms(n: u64) -> Option<Duration> {
        Some(Duration::from_millis(n))
    }

    #[test]
    fn recurs_counts_then_stops() {
        let outputs = run(&recurs::<()>(3), 0, std::iter::repeat(()).take(10));
        assert_eq!(outputs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn stop_never_continues() {
        assert_eq!(delays(&stop::<()>(), 1), vec![None]);
        assert_eq!(delays(&once::<()>(), 2), vec![ms(0), None]);
    }

    #[test]
    fn spaced_waits_each_time() {
        let s = spaced::<()>(Duration::from_millis(100));
        assert_eq!(delays(&s, 3), vec![ms(100), ms(100), ms(100)]);
    }

    #[test]
    fn exponential_doubles() {
        let s = exponential::<()>(Duration::from_millis(10), 2.0);
        assert_eq!(delays(&s, 4), vec![ms(10), ms(20), ms(40), ms(80)]);
    }

    #[test]
    fn fibonacci_sequence() {
        let s = fibonacci::<()>(Duration::from_millis(10));
        assert_eq!(delays(&s, 5), vec![ms(10), ms(10), ms(20), ms(30), ms(50)]);
    }

    #[test]
    fn linear_grows() {
        let s = linear::<()>(Duration::from_millis(5));
        assert_eq!(delays(&s, 3), vec![ms(5), ms(10), ms(15)]);
    }

    #[test]
    fn fixed_snaps_to_grid() {
        let s = fixed::<()>(Duration::from_millis(100));
        let state = s.initial();
        let (state, _, d) = s.step(0, &(), &state);
        assert_eq!(d.next_millis(), Some(100));
        // Ran 30ms late: the next boundary is still on the 100ms grid.
        let (state, _, d) = s.step(130, &(), &state);
        assert_eq!(d.next_millis(), Some(200));
        // Ran far behind: recur immediately.
        let (_, _, d) = s.step(450, &(), &state);
        assert_eq!(d.next_millis(), Some(450));
    }

    #[test]
    fn intersect_takes_max_delay_and_min_recurrences() {
        let s = recurs::<()>(2).intersect(spaced(Duration::from_millis(50)));
        assert_eq!(delays(&s, 4), vec![ms(50), ms(50), None, None]);
    }

    #[test]
    fn union_takes_min_delay_and_max_recurrences() {
        let s = recurs::<()>(1).union(spaced(Duration::from_millis(50)));
        assert_eq!(delays(&s, 2), vec![ms(0), ms(50)]);
    }

    #[test]
    fn and_then_switches_after_done() {
        let s = recurs::<()>(1).and_then(spaced(Duration::from_millis(7)));
        assert_eq!(delays(&s, 3), vec![ms(0), ms(7), ms(7)]);
    }

    #[test]
    fn while_output_stops() {
        let s = forever::<()>().while_output(|n| *n < 2);
        assert_eq!(run(&s, 0, std::iter::repeat(()).take(10)), vec![0, 1, 2]);
    }

    #[test]
    fn while_input_stops_on_input() {
        let s = forever::<i32>().while_input(|n| *n > 0);
        assert_eq!(run(&s, 0, vec![3, 2, 0, 5]), vec![0, 1, 2]);
    }

    #[test]
    fn up_to_stops_after_budget() {
        let s = spaced::<()>(Duration::from_millis(40)).up_to(Duration::from_millis(100));
        assert_eq!(delays(&s, 5), vec![ms(40), ms(40), ms(40), None, None]);
    }

    #[test]
    fn add_delay_adds_output() {
        let s = recurs::<()>(5).add_delay(|n| Duration::from_millis(*n * 10));
        assert_eq!(delays(&s, 3), vec![ms(0), ms(10), ms(20)]);
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let s = spaced::<()>(Duration::from_millis(1_000)).jittered(99);
        let a = delays(&s, 20);
        let b = delays(&s, 20);
        assert_eq!(a, b);
        for d in a.into_iter().flatten() {
            assert!(d >= Duration::from_millis(800) && d < Duration::from_millis(1_200));
        }
    }

    #[test]
    fn elapsed_tracks_time() {
        let s = elapsed::<()>();
        let st = s.initial();
        let (st, out, _) = s.step(1_000, &(), &st);
        assert_eq!(out, Duration::ZERO);
        let (_, out, _) = s.step(1_250, &(), &st);
        assert_eq!(out, Duration::from_millis(250));
    }

    #[test]
    fn driver_steps_and_resets() {
        let mut d = Driver::new(recurs::<()>(1));
        assert_eq!(d.next(10, &()), Some((0, 10)));
        assert_eq!(d.next(10, &()), None);
        assert_eq!(d.last(), Some(&1));
        d.reset();
        assert_eq!(d.next(10, &()), Some((0, 10)));
    }
}
