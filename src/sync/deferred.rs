//! Single-assignment values fibers can wait for.
//!
//! A [`Deferred`] starts empty and is completed at most once, with a value,
//! a failure or any other exit. Fibers calling [`Deferred::await_value`]
//! suspend until then and all resume with the same outcome.
//!
//! # Cancel Safety
//!
//! - `await_value`: interrupting a waiter removes it; the deferred is left
//!   untouched.
//! - Racing completions: only the first one counts; the others report
//!   `false`.

use crate::effect::op::{erase, erase_exit, Op};
use crate::effect::{Data, Effect};
use crate::runtime::fiber::Resumer;
use crate::types::{Cause, Exit, FiberId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

enum State<A, E> {
    Pending {
        waiters: BTreeMap<u64, Resumer>,
        next_waiter: u64,
    },
    Done(Exit<A, E>),
}

/// A value that is set once and awaited by any number of fibers.
pub struct Deferred<A, E = Infallible> {
    state: Arc<Mutex<State<A, E>>>,
}

impl<A, E> Clone for Deferred<A, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<A, E> fmt::Debug for Deferred<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = matches!(*self.state.lock(), State::Done(_));
        f.debug_struct("Deferred").field("done", &done).finish()
    }
}

impl<A: Data, E: Data> Deferred<A, E> {
    /// Creates an empty deferred outside any fiber.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending {
                waiters: BTreeMap::new(),
                next_waiter: 0,
            })),
        }
    }

    /// Creates an empty deferred.
    #[must_use]
    pub fn make<E2: Data>() -> Effect<Self, E2> {
        Effect::sync(Self::new)
    }

    /// Completes with `exit` unless already done; returns whether this call
    /// completed it. Waiters are resumed outside the lock.
    pub fn complete(&self, exit: Exit<A, E>) -> bool {
        let resumed = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending { waiters, .. } => {
                    let waiters = std::mem::take(waiters);
                    *state = State::Done(exit.clone());
                    waiters
                }
            }
        };
        let erased = erase_exit(exit);
        for resumer in resumed.into_values() {
            resumer.resume(Op::from_exit(&erased));
        }
        true
    }

    /// Completes with `exit`.
    #[must_use]
    pub fn done<E2: Data>(&self, exit: Exit<A, E>) -> Effect<bool, E2> {
        let this = self.clone();
        Effect::sync(move || this.complete(exit.clone()))
    }

    /// Completes with a value.
    #[must_use]
    pub fn succeed<E2: Data>(&self, value: A) -> Effect<bool, E2> {
        self.done(Exit::Success(value))
    }

    /// Completes with a typed failure.
    #[must_use]
    pub fn fail<E2: Data>(&self, error: E) -> Effect<bool, E2> {
        self.done(Exit::Failure(Cause::Fail(error)))
    }

    /// Completes with a defect.
    #[must_use]
    pub fn die<E2: Data>(&self, message: impl Into<String>) -> Effect<bool, E2> {
        self.done(Exit::Failure(Cause::die(message)))
    }

    /// Completes with an interruption by the calling fiber.
    #[must_use]
    pub fn interrupt<E2: Data>(&self) -> Effect<bool, E2> {
        let this = self.clone();
        Effect::<FiberId, E2>::fiber_id()
            .map(move |id| this.complete(Exit::Failure(Cause::Interrupt(id))))
    }

    /// Waits for completion and continues with the outcome.
    #[must_use]
    pub fn await_value(&self) -> Effect<A, E> {
        let state = Arc::clone(&self.state);
        Effect::from_op(Op::async_op(FiberId::None, move |resumer| {
            let mut guard = state.lock();
            match &mut *guard {
                State::Done(exit) => {
                    let now = Op::from_exit(&erase_exit(exit.clone()));
                    drop(guard);
                    resumer.resume(now);
                    None
                }
                State::Pending {
                    waiters,
                    next_waiter,
                } => {
                    let key = *next_waiter;
                    *next_waiter += 1;
                    waiters.insert(key, resumer);
                    let state = Arc::clone(&state);
                    Some(Op::sync(move || {
                        if let State::Pending { waiters, .. } = &mut *state.lock() {
                            waiters.remove(&key);
                        }
                        Ok(erase(()))
                    }))
                }
            }
        }))
    }

    /// The outcome if already completed.
    #[must_use]
    pub fn poll<E2: Data>(&self) -> Effect<Option<Exit<A, E>>, E2> {
        let state = Arc::clone(&self.state);
        Effect::sync(move || match &*state.lock() {
            State::Done(exit) => Some(exit.clone()),
            State::Pending { .. } => None,
        })
    }

    /// Number of fibers currently suspended in [`Deferred::await_value`].
    #[must_use]
    pub fn waiters(&self) -> usize {
        match &*self.state.lock() {
            State::Pending { waiters, .. } => waiters.len(),
            State::Done(_) => 0,
        }
    }

    /// Returns `true` once completed.
    #[must_use]
    pub fn is_done<E2: Data>(&self) -> Effect<bool, E2> {
        let state = Arc::clone(&self.state);
        Effect::sync(move || matches!(*state.lock(), State::Done(_)))
    }
}

impl<A: Data, E: Data> Default for Deferred<A, E> {
    fn default() -> Self {
        Self::new()
    }
}
