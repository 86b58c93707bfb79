//! Effect descriptions.
//!
//! An [`Effect<A, E>`] is an immutable, reusable description of a
//! computation that succeeds with `A`, fails with a [`Cause<E>`], or is
//! interrupted. Nothing happens until a [`Runtime`](crate::runtime::Runtime)
//! interprets it on a fiber. Building an effect never runs user code; user
//! closures are invoked by the run loop, where panics are caught and turned
//! into defects.
//!
//! ```ignore
//! let program: Effect<u32, String> = Effect::succeed(20)
//!     .flat_map(|n| if n > 10 { Effect::succeed(n * 2) } else { Effect::fail("small".into()) })
//!     .ensuring(Effect::log_info("done"));
//! ```

mod log;
pub(crate) mod op;

pub use log::LogLevel;
pub use op::{AnyValue, Data, ErasedExit};

use crate::runtime::fiber::{RawFiber, Resumer};
use crate::runtime::FiberHandle;
use crate::time::Clock;
use crate::types::{Cause, Exit, FiberId};
use op::{
    downcast, erase, erase_cause, erase_exit, failures_to_defects, restore_cause, restore_exit,
    AnyCause, Op,
};
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// An effect with its value and error types erased, as handed to a
/// [`Supervisor`](crate::runtime::Supervisor) when a fiber starts.
pub type AnyEffect = Effect<AnyValue, AnyValue>;

/// A lazy, reusable description of a computation.
pub struct Effect<A, E = Infallible> {
    op: Op,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self {
            op: self.op.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.op {
            Op::Succeed(_) => "Succeed",
            Op::Fail(_) => "Fail",
            Op::Sync(_) => "Sync",
            Op::Suspend(_) => "Suspend",
            Op::FlatMap(..) => "FlatMap",
            Op::Fold(..) => "Fold",
            Op::SetInterruptible(..) => "SetInterruptible",
            Op::WithFiber(_) => "WithFiber",
            Op::Fork { .. } => "Fork",
            Op::Async { .. } => "Async",
            Op::Yield => "Yield",
        };
        write!(f, "Effect<{kind}>")
    }
}

/// Completes an [`Effect::async_effect`] from outside the run loop.
///
/// Only the first completion counts; later ones are ignored.
pub struct Callback<A, E> {
    resumer: Resumer,
    _marker: PhantomData<fn(A, E)>,
}

impl<A, E> Clone for Callback<A, E> {
    fn clone(&self) -> Self {
        Self {
            resumer: self.resumer.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: Data, E: Data> Callback<A, E> {
    /// Resumes with a value.
    pub fn succeed(&self, value: A) {
        self.resumer.resume(Op::Succeed(erase(value)));
    }

    /// Resumes with a typed failure.
    pub fn fail(&self, error: E) {
        self.resumer.resume(Op::Fail(Cause::Fail(erase(error))));
    }

    /// Resumes with a defect.
    pub fn die(&self, message: impl Into<String>) {
        self.resumer.resume(Op::Fail(Cause::die(message)));
    }

    /// Resumes with an exit.
    pub fn done(&self, exit: Exit<A, E>) {
        self.resumer.resume(Op::from_exit(&erase_exit(exit)));
    }

    /// Resumes by running `effect` on the suspended fiber.
    pub fn resume_with(&self, effect: Effect<A, E>) {
        self.resumer.resume(effect.op);
    }
}

/// Restores the interruptibility that was in effect outside an
/// [`Effect::uninterruptible_mask`] region.
#[derive(Clone, Copy, Debug)]
pub struct Restore {
    interruptible: bool,
}

impl Restore {
    /// Runs `effect` with the outer interruptibility.
    #[must_use]
    pub fn apply<A, E>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        Effect::from_op(Op::SetInterruptible(Arc::new(effect.op), self.interruptible))
    }
}

pub(crate) fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Suspends for `duration` on `clock`; the canceler removes the timer.
pub(crate) fn sleep_on(clock: Arc<dyn Clock>, duration: Duration) -> Op {
    Op::suspend(move || {
        let deadline = clock.current_time_millis().saturating_add(millis(duration));
        let clock = Arc::clone(&clock);
        Op::async_op(FiberId::None, move |resumer| {
            let id = clock.register_timer(deadline, Box::new(move || resumer.resume(Op::unit())));
            let clock = Arc::clone(&clock);
            Some(Op::sync(move || {
                clock.cancel_timer(id);
                Ok(erase(()))
            }))
        })
    })
}

/// Runs `op`, then `finalizer(exit)` uninterruptibly, whatever the exit.
pub(crate) fn on_exit_op(op: Op, finalizer: Arc<dyn Fn(&ErasedExit) -> Op + Send + Sync>) -> Op {
    let op = Arc::new(op);
    Op::with_fiber(move |scope| {
        let body = Op::SetInterruptible(Arc::clone(&op), scope.interruptible);
        let on_fail = Arc::clone(&finalizer);
        let on_ok = Arc::clone(&finalizer);
        Op::Fold(
            Arc::new(body),
            Arc::new(move |cause: AnyCause| {
                let fin = on_fail(&Exit::Failure(cause.clone()));
                let first = cause.clone();
                Op::Fold(
                    Arc::new(fin),
                    Arc::new(move |fin_cause| Op::Fail(first.clone().then(fin_cause))),
                    Arc::new(move |_| Op::Fail(cause.clone())),
                )
            }),
            Arc::new(move |value: AnyValue| {
                on_ok(&Exit::Success(Arc::clone(&value)))
                    .flat_map(move |_| Op::Succeed(Arc::clone(&value)))
            }),
        )
        .uninterruptible()
    })
}

impl<A, E> Effect<A, E> {
    pub(crate) const fn from_op(op: Op) -> Self {
        Self {
            op,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_op(self) -> Op {
        self.op
    }
}

impl<A: Data> Effect<A, Infallible> {
    /// Gives an effect that cannot fail any error type.
    #[must_use]
    pub fn widen<E2: Data>(self) -> Effect<A, E2> {
        Effect::from_op(self.op)
    }
}

// Constructors.
impl<A: Data, E: Data> Effect<A, E> {
    /// Succeeds with `value`.
    #[must_use]
    pub fn succeed(value: A) -> Self {
        Self::from_op(Op::Succeed(erase(value)))
    }

    /// Fails with a typed error.
    #[must_use]
    pub fn fail(error: E) -> Self {
        Self::from_op(Op::Fail(Cause::Fail(erase(error))))
    }

    /// Fails with an arbitrary cause.
    #[must_use]
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::from_op(Op::Fail(erase_cause(cause)))
    }

    /// Fails with a defect.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::from_op(Op::Fail(Cause::die(message)))
    }

    /// Computes a value when run. A panic becomes a defect.
    pub fn sync(f: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self::from_op(Op::sync(move || Ok(erase(f()))))
    }

    /// Computes a value or a typed failure when run.
    pub fn try_sync(f: impl Fn() -> Result<A, E> + Send + Sync + 'static) -> Self {
        Self::from_op(Op::sync(move || match f() {
            Ok(a) => Ok(erase(a)),
            Err(e) => Err(Cause::Fail(erase(e))),
        }))
    }

    /// Builds the effect to run lazily, each time it is run.
    pub fn suspend(f: impl Fn() -> Self + Send + Sync + 'static) -> Self {
        Self::from_op(Op::suspend(move || f().op))
    }

    /// Suspends the fiber until `register`'s callback is completed.
    ///
    /// `register` may return a canceler, run uninterruptibly if the fiber is
    /// interrupted while waiting.
    pub fn async_effect(
        register: impl Fn(Callback<A, E>) -> Option<Effect<(), Infallible>> + Send + Sync + 'static,
    ) -> Self {
        Self::async_blocking_on(FiberId::None, register)
    }

    /// Like [`Effect::async_effect`], recording which fiber is waited for.
    pub fn async_blocking_on(
        blocking_on: FiberId,
        register: impl Fn(Callback<A, E>) -> Option<Effect<(), Infallible>> + Send + Sync + 'static,
    ) -> Self {
        Self::from_op(Op::async_op(blocking_on, move |resumer| {
            register(Callback {
                resumer,
                _marker: PhantomData,
            })
            .map(|canceler| canceler.op)
        }))
    }

    /// Never completes; only interruption ends it.
    #[must_use]
    pub fn never() -> Self {
        Self::from_op(Op::async_op(FiberId::None, |_| None))
    }

    /// Lifts an exit.
    #[must_use]
    pub fn from_exit(exit: Exit<A, E>) -> Self {
        Self::from_op(Op::from_exit(&erase_exit(exit)))
    }

    /// Lifts a result.
    #[must_use]
    pub fn from_result(result: Result<A, E>) -> Self {
        Self::from_exit(Exit::from(result))
    }

    /// Runs the effects in order, collecting their values.
    #[must_use]
    pub fn collect_all(effects: impl IntoIterator<Item = Self>) -> Effect<Vec<A>, E> {
        effects
            .into_iter()
            .fold(Effect::succeed(Vec::new()), |acc, next| {
                acc.zip_with(next, |mut values, a| {
                    values.push(a);
                    values
                })
            })
    }

    /// Applies `f` to each item in order, collecting the values.
    pub fn for_each<T>(
        items: impl IntoIterator<Item = T>,
        f: impl Fn(T) -> Self,
    ) -> Effect<Vec<A>, E> {
        Self::collect_all(items.into_iter().map(f))
    }

    /// Runs `use_fn` on an acquired resource and releases it afterwards.
    ///
    /// Acquisition and release are uninterruptible; release runs whatever
    /// the outcome of `use_fn`.
    pub fn acquire_use_release<R: Data, X: Data>(
        acquire: Effect<R, E>,
        use_fn: impl Fn(R) -> Self + Send + Sync + 'static,
        release: impl Fn(R, &Exit<A, E>) -> Effect<X, Infallible> + Send + Sync + 'static,
    ) -> Self {
        let use_fn = Arc::new(use_fn);
        let release = Arc::new(release);
        Self::uninterruptible_mask(move |restore| {
            let use_fn = Arc::clone(&use_fn);
            let release = Arc::clone(&release);
            acquire.clone().flat_map(move |resource: R| {
                let r = resource.clone();
                let release = Arc::clone(&release);
                restore
                    .apply(use_fn(resource))
                    .on_exit(move |exit| release(r.clone(), exit).as_unit())
            })
        })
    }

    /// Masks interruption for the effect built by `f`, which can restore the
    /// outer interruptibility for the parts that may be interrupted.
    pub fn uninterruptible_mask(f: impl Fn(Restore) -> Self + Send + Sync + 'static) -> Self {
        Self::from_op(Op::with_fiber(move |scope| {
            let restore = Restore {
                interruptible: scope.interruptible,
            };
            f(restore).op.uninterruptible()
        }))
    }
}

// Constructors with a fixed value type.
impl<E: Data> Effect<(), E> {
    /// Succeeds with unit.
    #[must_use]
    pub fn unit() -> Self {
        Self::from_op(Op::unit())
    }

    /// Yields the worker thread to other fibers.
    #[must_use]
    pub fn yield_now() -> Self {
        Self::from_op(Op::Yield)
    }

    /// Interrupts the running fiber itself.
    #[must_use]
    pub fn interrupt() -> Self {
        Self::from_op(Op::with_fiber(|scope| {
            Op::Fail(Cause::Interrupt(scope.fiber.id().clone()))
        }))
    }

    /// Suspends the fiber for `duration` on the runtime's clock.
    #[must_use]
    pub fn sleep(duration: Duration) -> Self {
        Self::from_op(Op::with_fiber(move |scope| {
            sleep_on(scope.fiber.runtime().clock(), duration)
        }))
    }
}

impl<E: Data> Effect<FiberId, E> {
    /// The id of the running fiber.
    #[must_use]
    pub fn fiber_id() -> Self {
        Self::from_op(Op::with_fiber(|scope| {
            Op::Succeed(erase(scope.fiber.id().clone()))
        }))
    }
}

impl<E: Data> Effect<i64, E> {
    /// Milliseconds since the epoch according to the runtime's clock.
    #[must_use]
    pub fn current_time_millis() -> Self {
        Self::from_op(Op::with_fiber(|scope| {
            Op::Succeed(erase(scope.fiber.runtime().clock().current_time_millis()))
        }))
    }
}

// Sequencing and error handling.
impl<A: Data, E: Data> Effect<A, E> {
    /// Transforms the success value.
    #[must_use]
    pub fn map<B: Data>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Effect<B, E> {
        Effect::from_op(self.op.flat_map(move |v| match downcast::<A>(v) {
            Ok(a) => Op::Succeed(erase(f(a))),
            Err(c) => Op::Fail(c),
        }))
    }

    /// Continues with the effect `f` builds from the success value.
    #[must_use]
    pub fn flat_map<B: Data>(
        self,
        f: impl Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    ) -> Effect<B, E> {
        Effect::from_op(self.op.flat_map(move |v| match downcast::<A>(v) {
            Ok(a) => f(a).op,
            Err(c) => Op::Fail(c),
        }))
    }

    /// Runs `that` after `self`, keeping `that`'s value.
    #[must_use]
    pub fn and_then<B: Data>(self, that: Effect<B, E>) -> Effect<B, E> {
        Effect::from_op(self.op.flat_map(move |_| that.op.clone()))
    }

    /// Runs both in order and combines the values.
    #[must_use]
    pub fn zip_with<B: Data, C: Data>(
        self,
        that: Effect<B, E>,
        f: impl Fn(A, B) -> C + Send + Sync + 'static,
    ) -> Effect<C, E> {
        let f = Arc::new(f);
        self.flat_map(move |a| {
            let f = Arc::clone(&f);
            that.clone().map(move |b| f(a.clone(), b))
        })
    }

    /// Runs both in order, pairing the values.
    #[must_use]
    pub fn zip<B: Data>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Runs both in order, keeping the first value.
    #[must_use]
    pub fn zip_left<B: Data>(self, that: Effect<B, E>) -> Self {
        self.zip_with(that, |a, _| a)
    }

    /// Runs both in order, keeping the second value.
    #[must_use]
    pub fn zip_right<B: Data>(self, that: Effect<B, E>) -> Effect<B, E> {
        self.and_then(that)
    }

    /// Runs a side effect on the success value, keeping the value.
    #[must_use]
    pub fn tap<X: Data>(self, f: impl Fn(&A) -> Effect<X, E> + Send + Sync + 'static) -> Self {
        self.flat_map(move |a| {
            let keep = a.clone();
            f(&a).map(move |_| keep.clone())
        })
    }

    /// Discards the success value.
    #[must_use]
    pub fn as_unit(self) -> Effect<(), E> {
        Effect::from_op(self.op.flat_map(|_| Op::unit()))
    }

    /// Replaces the success value.
    #[must_use]
    pub fn as_value<B: Data>(self, value: B) -> Effect<B, E> {
        self.map(move |_| value.clone())
    }

    /// Transforms typed failures, leaving defects and interruptions alone.
    #[must_use]
    pub fn map_err<E2: Data>(self, f: impl Fn(E) -> E2 + Send + Sync + 'static) -> Effect<A, E2> {
        Effect::from_op(Op::Fold(
            Arc::new(self.op),
            Arc::new(move |cause| Op::Fail(erase_cause(restore_cause::<E>(cause).map(&f)))),
            Arc::new(Op::Succeed),
        ))
    }

    /// Handles every outcome, including defects and interruptions.
    #[must_use]
    pub fn fold_cause_effect<B: Data, E2: Data>(
        self,
        on_failure: impl Fn(Cause<E>) -> Effect<B, E2> + Send + Sync + 'static,
        on_success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        Effect::from_op(Op::Fold(
            Arc::new(self.op),
            Arc::new(move |cause| on_failure(restore_cause(cause)).op),
            Arc::new(move |v| match downcast::<A>(v) {
                Ok(a) => on_success(a).op,
                Err(c) => Op::Fail(c),
            }),
        ))
    }

    /// Handles typed failures and success; defects and interruptions pass.
    #[must_use]
    pub fn fold_effect<B: Data, E2: Data>(
        self,
        on_failure: impl Fn(E) -> Effect<B, E2> + Send + Sync + 'static,
        on_success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        Effect::from_op(Op::Fold(
            Arc::new(self.op),
            Arc::new(move |cause| recover::<E, _>(cause, |e| on_failure(e).op)),
            Arc::new(move |v| match downcast::<A>(v) {
                Ok(a) => on_success(a).op,
                Err(c) => Op::Fail(c),
            }),
        ))
    }

    /// Materialises the outcome as a value.
    #[must_use]
    pub fn exit<E2: Data>(self) -> Effect<Exit<A, E>, E2> {
        self.fold_cause_effect(
            |cause| Effect::succeed(Exit::Failure(cause)),
            |a| Effect::succeed(Exit::Success(a)),
        )
    }

    /// Materialises typed failures as `Err`.
    #[must_use]
    pub fn either<E2: Data>(self) -> Effect<Result<A, E>, E2> {
        self.fold_effect(|e| Effect::succeed(Err(e)), |a| Effect::succeed(Ok(a)))
    }

    /// Recovers from a typed failure. Defects and interruptions are not
    /// caught.
    #[must_use]
    pub fn catch_all<E2: Data>(
        self,
        f: impl Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        Effect::from_op(Op::Fold(
            Arc::new(self.op),
            Arc::new(move |cause| recover::<E, _>(cause, |e| f(e).op)),
            Arc::new(Op::Succeed),
        ))
    }

    /// Recovers from any cause.
    #[must_use]
    pub fn catch_all_cause<E2: Data>(
        self,
        f: impl Fn(Cause<E>) -> Effect<A, E2> + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        Effect::from_op(Op::Fold(
            Arc::new(self.op),
            Arc::new(move |cause| f(restore_cause(cause)).op),
            Arc::new(Op::Succeed),
        ))
    }

    /// Runs `that` if `self` fails with a typed error.
    #[must_use]
    pub fn or_else<E2: Data>(self, that: Effect<A, E2>) -> Effect<A, E2> {
        self.catch_all(move |_| that.clone())
    }

    /// Discards the value and typed failures.
    #[must_use]
    pub fn ignore<E2: Data>(self) -> Effect<(), E2> {
        self.fold_effect(|_| Effect::unit(), |_| Effect::unit())
    }

    /// Runs `finalizer` after `self`, whatever the outcome.
    ///
    /// A finalizer failure after a failed `self` is kept in sequence with the
    /// original cause.
    #[must_use]
    pub fn ensuring<X: Data>(self, finalizer: Effect<X, Infallible>) -> Self {
        let fin = finalizer.op;
        Self::from_op(on_exit_op(self.op, Arc::new(move |_| fin.clone())))
    }

    /// Runs `f` with the exit of `self`, uninterruptibly.
    #[must_use]
    pub fn on_exit(
        self,
        f: impl Fn(&Exit<A, E>) -> Effect<(), Infallible> + Send + Sync + 'static,
    ) -> Self {
        Self::from_op(on_exit_op(
            self.op,
            Arc::new(move |exit: &ErasedExit| f(&restore_exit(exit.clone())).op),
        ))
    }

    /// Runs `cleanup` only if `self` is interrupted.
    #[must_use]
    pub fn on_interrupt(self, cleanup: Effect<(), Infallible>) -> Self {
        self.on_exit(move |exit| {
            if exit.is_interrupted() {
                cleanup.clone()
            } else {
                Effect::unit()
            }
        })
    }

    /// Shields the effect from interruption.
    #[must_use]
    pub fn uninterruptible(self) -> Self {
        Self::from_op(self.op.uninterruptible())
    }

    /// Makes the effect interruptible again inside an uninterruptible region.
    #[must_use]
    pub fn interruptible(self) -> Self {
        Self::from_op(Op::SetInterruptible(Arc::new(self.op), true))
    }

    /// Starts the effect on a supervised child fiber.
    ///
    /// The child is interrupted and awaited when the parent finishes.
    #[must_use]
    pub fn fork<E2: Data>(self) -> Effect<FiberHandle<A, E>, E2> {
        self.fork_with(false)
    }

    /// Starts the effect on an unsupervised fiber that outlives its parent.
    #[must_use]
    pub fn fork_daemon<E2: Data>(self) -> Effect<FiberHandle<A, E>, E2> {
        self.fork_with(true)
    }

    fn fork_with<E2: Data>(self, daemon: bool) -> Effect<FiberHandle<A, E>, E2> {
        let fork = Op::Fork {
            effect: Arc::new(self.op),
            daemon,
        };
        Effect::from_op(fork.flat_map(|raw| match downcast::<RawFiber>(raw) {
            Ok(raw) => Op::Succeed(erase(FiberHandle::<A, E>::from_raw(raw))),
            Err(c) => Op::Fail(c),
        }))
    }
}

/// Passes the first typed failure to `handler` when it may be recovered,
/// otherwise propagates the cause with foreign failures turned into defects.
fn recover<E: Data, F: Fn(E) -> Op>(cause: AnyCause, handler: F) -> Op {
    match restore_cause::<E>(cause.clone()).failure_or_cause() {
        Ok(e) => handler(e),
        Err(_) => Op::Fail(failures_to_defects::<E>(cause)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_names_the_instruction() {
        let e: Effect<u8> = Effect::succeed(1);
        assert_eq!(format!("{e:?}"), "Effect<Succeed>");
        let e: Effect<u8> = Effect::sync(|| 1).map(|x| x + 1);
        assert_eq!(format!("{e:?}"), "Effect<FlatMap>");
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), i64::MAX);
    }

    #[test]
    fn recover_skips_causes_with_defects() {
        let cause: AnyCause = erase_cause(Cause::fail(1u8).both(Cause::die("boom")));
        let op = recover::<u8, _>(cause, |_| Op::unit());
        match op {
            Op::Fail(c) => {
                assert!(c.is_die());
                assert!(!c.is_failure());
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn recover_hands_over_lone_failure() {
        let cause: AnyCause = erase_cause(Cause::fail(7u8));
        let op = recover::<u8, _>(cause, |e| Op::Succeed(erase(u32::from(e) * 2)));
        match op {
            Op::Succeed(v) => assert_eq!(v.downcast_ref::<u32>(), Some(&14)),
            _ => panic!("expected success"),
        }
    }
}
