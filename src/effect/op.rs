//! The closed instruction set interpreted by the fiber run loop.
//!
//! Effects are erased to [`Op`] trees whose values travel as [`AnyValue`].
//! Every payload sits behind an `Arc`, so cloning an op is shallow and an
//! effect can be run any number of times.

use crate::runtime::fiber::{FiberScope, Resumer};
use crate::types::{Cause, Defect, Exit, FiberId};
use std::any::{type_name, Any};
use std::sync::Arc;

/// Type-erased value flowing through the run loop.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Exit of a fiber with erased value and error types.
pub type ErasedExit = Exit<AnyValue, AnyValue>;

pub(crate) type AnyCause = Cause<AnyValue>;
pub(crate) type Cont = Arc<dyn Fn(AnyValue) -> Op + Send + Sync>;
pub(crate) type FailCont = Arc<dyn Fn(AnyCause) -> Op + Send + Sync>;
pub(crate) type Register = Arc<dyn Fn(Resumer) -> Option<Op> + Send + Sync>;
pub(crate) type ScopeFn = Arc<dyn Fn(&mut FiberScope<'_>) -> Op + Send + Sync>;

/// Bound shared by every value or error an effect can carry.
pub trait Data: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Data for T {}

#[derive(Clone)]
pub(crate) enum Op {
    Succeed(AnyValue),
    Fail(AnyCause),
    Sync(Arc<dyn Fn() -> Result<AnyValue, AnyCause> + Send + Sync>),
    Suspend(Arc<dyn Fn() -> Op + Send + Sync>),
    FlatMap(Arc<Op>, Cont),
    Fold(Arc<Op>, FailCont, Cont),
    SetInterruptible(Arc<Op>, bool),
    WithFiber(ScopeFn),
    Fork { effect: Arc<Op>, daemon: bool },
    Async { register: Register, blocking_on: FiberId },
    Yield,
}

impl Op {
    pub(crate) fn unit() -> Self {
        Self::Succeed(erase(()))
    }

    pub(crate) fn sync(f: impl Fn() -> Result<AnyValue, AnyCause> + Send + Sync + 'static) -> Self {
        Self::Sync(Arc::new(f))
    }

    pub(crate) fn suspend(f: impl Fn() -> Self + Send + Sync + 'static) -> Self {
        Self::Suspend(Arc::new(f))
    }

    pub(crate) fn flat_map(self, k: impl Fn(AnyValue) -> Self + Send + Sync + 'static) -> Self {
        Self::FlatMap(Arc::new(self), Arc::new(k))
    }

    pub(crate) fn with_fiber(f: impl Fn(&mut FiberScope<'_>) -> Self + Send + Sync + 'static) -> Self {
        Self::WithFiber(Arc::new(f))
    }

    pub(crate) fn async_op(
        blocking_on: FiberId,
        register: impl Fn(Resumer) -> Option<Self> + Send + Sync + 'static,
    ) -> Self {
        Self::Async {
            register: Arc::new(register),
            blocking_on,
        }
    }

    pub(crate) fn uninterruptible(self) -> Self {
        Self::SetInterruptible(Arc::new(self), false)
    }

    pub(crate) fn from_exit(exit: &ErasedExit) -> Self {
        match exit {
            Exit::Success(v) => Self::Succeed(Arc::clone(v)),
            Exit::Failure(c) => Self::Fail(c.clone()),
        }
    }
}

pub(crate) fn erase<A: Data>(value: A) -> AnyValue {
    Arc::new(value)
}

/// Recovers a typed value; a mismatch is a defect.
pub(crate) fn downcast<A: Data>(value: AnyValue) -> Result<A, AnyCause> {
    match value.downcast::<A>() {
        Ok(shared) => Ok(Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone())),
        Err(_) => Err(Cause::Die(Defect::new(format!(
            "value type mismatch: expected {}",
            type_name::<A>()
        )))),
    }
}

pub(crate) fn erase_cause<E: Data>(cause: Cause<E>) -> AnyCause {
    cause.map(|e| erase(e))
}

/// Recovers a typed cause; failures of another type become defects.
pub(crate) fn restore_cause<E: Data>(cause: AnyCause) -> Cause<E> {
    match cause {
        Cause::Empty => Cause::Empty,
        Cause::Fail(e) => match e.downcast::<E>() {
            Ok(shared) => Cause::Fail(Arc::try_unwrap(shared).unwrap_or_else(|s| (*s).clone())),
            Err(_) => Cause::Die(Defect::new(format!(
                "unhandled failure: expected error type {}",
                type_name::<E>()
            ))),
        },
        Cause::Die(d) => Cause::Die(d),
        Cause::Interrupt(id) => Cause::Interrupt(id),
        Cause::Then(l, r) => restore_cause(*l).then(restore_cause(*r)),
        Cause::Both(l, r) => restore_cause(*l).both(restore_cause(*r)),
    }
}

/// Turns typed failures into defects, for causes that change error type
/// without being recovered.
pub(crate) fn failures_to_defects<E: Data>(cause: AnyCause) -> AnyCause {
    match cause {
        Cause::Fail(_) => Cause::Die(Defect::new(format!(
            "unhandled failure of type {} alongside a defect",
            type_name::<E>()
        ))),
        Cause::Then(l, r) => failures_to_defects::<E>(*l).then(failures_to_defects::<E>(*r)),
        Cause::Both(l, r) => failures_to_defects::<E>(*l).both(failures_to_defects::<E>(*r)),
        other => other,
    }
}

pub(crate) fn restore_exit<A: Data, E: Data>(exit: ErasedExit) -> Exit<A, E> {
    match exit {
        Exit::Success(v) => match downcast::<A>(v) {
            Ok(a) => Exit::Success(a),
            Err(c) => Exit::Failure(restore_cause(c)),
        },
        Exit::Failure(c) => Exit::Failure(restore_cause(c)),
    }
}

pub(crate) fn erase_exit<A: Data, E: Data>(exit: Exit<A, E>) -> ErasedExit {
    match exit {
        Exit::Success(a) => Exit::Success(erase(a)),
        Exit::Failure(c) => Exit::Failure(erase_cause(c)),
    }
}
