//! Typed handles to running fibers.

use crate::effect::op::{erase, restore_exit, Op};
use crate::effect::{Data, Effect, ErasedExit};
use crate::runtime::fiber::{Fiber, FiberStatus, RawFiber};
use crate::runtime::scheduler::current_worker;
use crate::types::{Cause, Exit, FiberId};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A handle to a fiber that will produce an `Exit<A, E>`.
///
/// Handles are cheap to clone. Dropping a handle does not affect the fiber.
pub struct FiberHandle<A, E> {
    fiber: Arc<Fiber>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for FiberHandle<A, E> {
    fn clone(&self) -> Self {
        Self {
            fiber: Arc::clone(&self.fiber),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for FiberHandle<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", self.fiber.id())
            .field("status", &self.fiber.status())
            .finish()
    }
}

/// Suspends until `fiber` is done and resumes with its erased exit.
fn await_exit_op<A: Data, E: Data>(fiber: Arc<Fiber>) -> Op {
    let blocking_on = fiber.id().clone();
    Op::async_op(blocking_on, move |resumer| {
        let key = fiber.observe(move |exit: &ErasedExit| {
            let typed: Exit<A, E> = restore_exit(exit.clone());
            resumer.resume(Op::Succeed(erase(typed)));
        });
        let fiber = Arc::clone(&fiber);
        key.map(move |key| {
            Op::sync(move || {
                fiber.unobserve(key);
                Ok(erase(()))
            })
        })
    })
}

impl<A: Data, E: Data> FiberHandle<A, E> {
    pub(crate) fn from_raw(raw: RawFiber) -> Self {
        Self {
            fiber: raw.0,
            _marker: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> &Arc<Fiber> {
        &self.fiber
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> &FiberId {
        self.fiber.id()
    }

    /// Current scheduling state.
    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.fiber.status()
    }

    /// Returns `true` once the exit is final.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.fiber.exit().is_some()
    }

    /// The exit if the fiber is done, without waiting.
    #[must_use]
    pub fn poll<E2: Data>(&self) -> Effect<Option<Exit<A, E>>, E2> {
        let fiber = Arc::clone(&self.fiber);
        Effect::sync(move || fiber.exit().map(restore_exit))
    }

    /// Waits for the fiber and returns its exit, whatever it is.
    #[must_use]
    pub fn await_exit<E2: Data>(&self) -> Effect<Exit<A, E>, E2> {
        Effect::from_op(await_exit_op::<A, E>(Arc::clone(&self.fiber)))
    }

    /// Waits for the fiber, merges its fiber refs into the caller and
    /// continues with its outcome.
    #[must_use]
    pub fn join(&self) -> Effect<A, E> {
        let this = self.clone();
        self.await_exit::<E>().flat_map(move |exit| {
            this.inherit_refs::<E>()
                .and_then(Effect::from_exit(exit.clone()))
        })
    }

    /// Merges the finished fiber's refs into the calling fiber. Does nothing
    /// while the fiber is still running.
    #[must_use]
    pub fn inherit_refs<E2: Data>(&self) -> Effect<(), E2> {
        let fiber = Arc::clone(&self.fiber);
        Effect::from_op(Op::with_fiber(move |scope| {
            if let Some(child) = fiber.final_refs() {
                let me = scope.fiber.id().clone();
                scope.refs.join_as(&me, &child);
            }
            Op::unit()
        }))
    }

    /// Interrupts the fiber on behalf of the caller and waits for it.
    #[must_use]
    pub fn interrupt<E2: Data>(&self) -> Effect<Exit<A, E>, E2> {
        let fiber = Arc::clone(&self.fiber);
        Effect::from_op(Op::with_fiber(move |scope| {
            fiber.interrupt_as(scope.fiber.id().clone());
            await_exit_op::<A, E>(Arc::clone(&fiber))
        }))
    }

    /// Interrupts the fiber on behalf of `by` and waits for it.
    #[must_use]
    pub fn interrupt_as<E2: Data>(&self, by: FiberId) -> Effect<Exit<A, E>, E2> {
        let fiber = Arc::clone(&self.fiber);
        Effect::from_op(Op::suspend(move || {
            fiber.interrupt_as(by.clone());
            await_exit_op::<A, E>(Arc::clone(&fiber))
        }))
    }

    /// Requests interruption without waiting for the fiber to finish.
    #[must_use]
    pub fn interrupt_fork<E2: Data>(&self) -> Effect<(), E2> {
        let fiber = Arc::clone(&self.fiber);
        Effect::from_op(Op::with_fiber(move |scope| {
            fiber.interrupt_as(scope.fiber.id().clone());
            Op::unit()
        }))
    }

    /// Blocks the calling host thread until the fiber is done.
    ///
    /// Returns a defect instead of blocking when called from a runtime
    /// worker, where waiting could starve the fiber being waited for.
    #[must_use]
    pub fn wait(&self) -> Exit<A, E> {
        if current_worker().is_some() {
            return Exit::Failure(Cause::die(
                "FiberHandle::wait called from a runtime worker thread",
            ));
        }
        let slot = Arc::new((Mutex::new(None::<ErasedExit>), Condvar::new()));
        let notify = Arc::clone(&slot);
        self.fiber.observe(move |exit| {
            *notify.0.lock() = Some(exit.clone());
            notify.1.notify_all();
        });
        let mut guard = slot.0.lock();
        loop {
            if let Some(exit) = guard.take() {
                return restore_exit(exit);
            }
            slot.1.wait(&mut guard);
        }
    }
}

