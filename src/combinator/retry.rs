//! Retrying and repeating effects under a [`Schedule`].
//!
//! Schedules are pure, so these combinators own the loop: they read the
//! runtime clock, step the schedule and sleep until the start of its next
//! interval. Sleeping goes through the runtime clock, which makes retries
//! deterministic under a [`TestClock`](crate::time::TestClock).
//!
//! # Cancellation Handling
//!
//! - Interrupting during a sleep cancels the timer; no further attempt runs.
//! - An attempt already in flight is interrupted like any other effect.

use crate::effect::{Data, Effect};
use crate::schedule::Schedule;
use crate::tracing_compat::trace;
use std::sync::Arc;

type OrElse<A, E, E2, O> = Arc<dyn Fn(E, O) -> Effect<A, E2> + Send + Sync>;

fn retry_loop<A, E, E2, S>(
    effect: Effect<A, E>,
    schedule: Arc<S>,
    state: S::State,
    or_else: OrElse<A, E, E2, S::Out>,
) -> Effect<A, E2>
where
    A: Data,
    E: Data,
    E2: Data,
    S: Schedule<In = E>,
{
    let attempt = effect.clone();
    attempt.catch_all(move |error: E| {
        let effect = effect.clone();
        let schedule = Arc::clone(&schedule);
        let state = state.clone();
        let or_else = Arc::clone(&or_else);
        Effect::<i64, E2>::current_time_millis().flat_map(move |now| {
            let (next, out, decision) = schedule.step(now, &error, &state);
            match decision.delay_from(now) {
                None => or_else(error.clone(), out),
                Some(delay) => {
                    trace!(delay = ?delay, "retrying after failure");
                    Effect::<(), E2>::sleep(delay).and_then(retry_loop(
                        effect.clone(),
                        Arc::clone(&schedule),
                        next,
                        Arc::clone(&or_else),
                    ))
                }
            }
        })
    })
}

fn repeat_loop<A, E, S>(effect: Effect<A, E>, schedule: Arc<S>, state: S::State) -> Effect<S::Out, E>
where
    A: Data,
    E: Data,
    S: Schedule<In = A>,
{
    effect.clone().flat_map(move |value: A| {
        step_then(effect.clone(), Arc::clone(&schedule), state.clone(), value)
    })
}

/// Steps the schedule with `input`; stops with its output or sleeps and
/// runs `effect` again.
fn step_then<A, E, S>(effect: Effect<A, E>, schedule: Arc<S>, state: S::State, input: A) -> Effect<S::Out, E>
where
    A: Data,
    E: Data,
    S: Schedule<In = A>,
{
    Effect::<i64, E>::current_time_millis().flat_map(move |now| {
        let (next, out, decision) = schedule.step(now, &input, &state);
        match decision.delay_from(now) {
            None => Effect::succeed(out),
            Some(delay) => Effect::<(), E>::sleep(delay).and_then(repeat_loop(
                effect.clone(),
                Arc::clone(&schedule),
                next,
            )),
        }
    })
}

impl<A: Data, E: Data> Effect<A, E> {
    /// Re-runs the effect after each typed failure while `schedule`
    /// continues, feeding it the error. Fails with the last error once the
    /// schedule is done. Defects and interruptions are never retried.
    #[must_use]
    pub fn retry<S: Schedule<In = E>>(self, schedule: S) -> Self {
        self.retry_or_else(schedule, |error, _| Effect::fail(error))
    }

    /// Like [`Effect::retry`], but hands the last error and the schedule's
    /// output to `or_else` once the schedule is done.
    #[must_use]
    pub fn retry_or_else<S, E2>(
        self,
        schedule: S,
        or_else: impl Fn(E, S::Out) -> Effect<A, E2> + Send + Sync + 'static,
    ) -> Effect<A, E2>
    where
        S: Schedule<In = E>,
        E2: Data,
    {
        let schedule = Arc::new(schedule);
        let state = schedule.initial();
        retry_loop(self, schedule, state, Arc::new(or_else))
    }

    /// Runs the effect, then again after each delay `schedule` asks for,
    /// feeding it every value. Yields the schedule's last output. A failure
    /// stops the loop.
    #[must_use]
    pub fn repeat<S: Schedule<In = A>>(self, schedule: S) -> Effect<S::Out, E> {
        let schedule = Arc::new(schedule);
        let state = schedule.initial();
        repeat_loop(self, schedule, state)
    }

    /// Lets `schedule` decide before every run, starting from `initial` as
    /// the first input; later inputs are the effect's values. The effect
    /// does not run at all if the schedule is done on the first step.
    #[must_use]
    pub fn schedule_from<S: Schedule<In = A>>(self, initial: A, schedule: S) -> Effect<S::Out, E> {
        let schedule = Arc::new(schedule);
        let state = schedule.initial();
        step_then(self, schedule, state, initial)
    }
}
