//! Transactions and the commit protocol.

use super::journal::Journal;
use super::tref::ErasedTRef;
use crate::effect::op::{erase, Op};
use crate::effect::{Data, Effect};
use crate::tracing_compat::trace;
use crate::types::{Cause, Defect, FiberId};
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of running a transaction body once against a journal.
pub(crate) enum TExit<A, E> {
    Succeed(A),
    Fail(E),
    Die(Defect),
    Retry,
}

impl<A, E> TExit<A, E> {
    fn map_value<B>(self, f: impl FnOnce(A) -> B) -> TExit<B, E> {
        match self {
            Self::Succeed(a) => TExit::Succeed(f(a)),
            Self::Fail(e) => TExit::Fail(e),
            Self::Die(d) => TExit::Die(d),
            Self::Retry => TExit::Retry,
        }
    }
}

type Body<A, E> = Arc<dyn Fn(&mut Journal) -> TExit<A, E> + Send + Sync>;

/// A transaction: a re-runnable description of reads and writes on
/// [`TRef`](super::TRef)s that commits atomically.
///
/// Bodies may run several times per commit, so they must not perform side
/// effects outside the journal.
pub struct Stm<A, E = Infallible> {
    body: Body<A, E>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Stm<A, E> {
    fn clone(&self) -> Self {
        Self {
            body: Arc::clone(&self.body),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Stm<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Stm")
    }
}

impl<A: Data, E: Data> Stm<A, E> {
    pub(crate) fn new(body: impl Fn(&mut Journal) -> TExit<A, E> + Send + Sync + 'static) -> Self {
        Self {
            body: Arc::new(body),
            _marker: PhantomData,
        }
    }

    pub(crate) fn run(&self, journal: &mut Journal) -> TExit<A, E> {
        (self.body)(journal)
    }

    /// Succeeds with `value`.
    #[must_use]
    pub fn succeed(value: A) -> Self {
        Self::new(move |_| TExit::Succeed(value.clone()))
    }

    /// Fails with a typed error. The journal is still committed.
    #[must_use]
    pub fn fail(error: E) -> Self {
        Self::new(move |_| TExit::Fail(error.clone()))
    }

    /// Aborts the transaction with a defect.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        let defect = Defect::new(message);
        Self::new(move |_| TExit::Die(defect.clone()))
    }

    /// Abandons this attempt and waits until a ref it read changes.
    #[must_use]
    pub fn retry() -> Self {
        Self::new(|_| TExit::Retry)
    }

    /// Transforms the value.
    #[must_use]
    pub fn map<B: Data>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Stm<B, E> {
        Stm::new(move |journal| self.run(journal).map_value(&f))
    }

    /// Continues with the transaction `f` builds from the value.
    #[must_use]
    pub fn flat_map<B: Data>(self, f: impl Fn(A) -> Stm<B, E> + Send + Sync + 'static) -> Stm<B, E> {
        Stm::new(move |journal| match self.run(journal) {
            TExit::Succeed(a) => f(a).run(journal),
            TExit::Fail(e) => TExit::Fail(e),
            TExit::Die(d) => TExit::Die(d),
            TExit::Retry => TExit::Retry,
        })
    }

    /// Runs `that` after `self`, keeping `that`'s value.
    #[must_use]
    pub fn and_then<B: Data>(self, that: Stm<B, E>) -> Stm<B, E> {
        self.flat_map(move |_| that.clone())
    }

    /// Runs both in order and combines the values.
    #[must_use]
    pub fn zip_with<B: Data, C: Data>(
        self,
        that: Stm<B, E>,
        f: impl Fn(A, B) -> C + Send + Sync + 'static,
    ) -> Stm<C, E> {
        Stm::new(move |journal| match self.run(journal) {
            TExit::Succeed(a) => that.run(journal).map_value(|b| f(a, b)),
            TExit::Fail(e) => TExit::Fail(e),
            TExit::Die(d) => TExit::Die(d),
            TExit::Retry => TExit::Retry,
        })
    }

    /// Runs both in order, pairing the values.
    #[must_use]
    pub fn zip<B: Data>(self, that: Stm<B, E>) -> Stm<(A, B), E> {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Tries `self`; if it retries, rolls back its writes and tries `that`.
    #[must_use]
    pub fn or_else(self, that: Self) -> Self {
        Self::new(move |journal| {
            let snapshot = journal.clone();
            match self.run(journal) {
                TExit::Retry => {
                    journal.reset_to(snapshot);
                    that.run(journal)
                }
                other => other,
            }
        })
    }

    /// Recovers from a typed failure.
    #[must_use]
    pub fn catch_all<E2: Data>(self, f: impl Fn(E) -> Stm<A, E2> + Send + Sync + 'static) -> Stm<A, E2> {
        Stm::new(move |journal| match self.run(journal) {
            TExit::Succeed(a) => TExit::Succeed(a),
            TExit::Fail(e) => f(e).run(journal),
            TExit::Die(d) => TExit::Die(d),
            TExit::Retry => TExit::Retry,
        })
    }

    /// Transforms the typed failure.
    #[must_use]
    pub fn map_err<E2: Data>(self, f: impl Fn(E) -> E2 + Send + Sync + 'static) -> Stm<A, E2> {
        Stm::new(move |journal| match self.run(journal) {
            TExit::Succeed(a) => TExit::Succeed(a),
            TExit::Fail(e) => TExit::Fail(f(e)),
            TExit::Die(d) => TExit::Die(d),
            TExit::Retry => TExit::Retry,
        })
    }

    /// Commits the transaction as an effect.
    ///
    /// Each attempt runs the body against a fresh journal. A valid journal
    /// is published atomically. An attempt that saw a concurrent commit is
    /// restarted. A retrying attempt suspends the fiber until one of the
    /// refs it read is changed by another commit, then starts over.
    #[must_use]
    pub fn commit(&self) -> Effect<A, E> {
        let stm = self.clone();
        Effect::from_op(Op::with_fiber(move |scope| {
            attempt(stm.clone(), scope.fiber.id().clone())
        }))
    }
}

impl<E: Data> Stm<(), E> {
    /// Retries unless `condition` holds.
    #[must_use]
    pub fn check(condition: bool) -> Self {
        if condition {
            Self::succeed(())
        } else {
            Self::retry()
        }
    }

    /// Succeeds with unit.
    #[must_use]
    pub fn unit() -> Self {
        Self::succeed(())
    }
}

fn attempt<A: Data, E: Data>(stm: Stm<A, E>, fiber: FiberId) -> Op {
    loop {
        let mut journal = Journal::new();
        let exit = catch_unwind(AssertUnwindSafe(|| stm.run(&mut journal)))
            .unwrap_or_else(|payload| TExit::Die(Defect::from_panic(&*payload)));
        let done = match exit {
            TExit::Succeed(a) => Op::Succeed(erase(a)),
            TExit::Fail(e) => Op::Fail(Cause::Fail(erase(e))),
            TExit::Die(defect) => {
                if journal.is_valid() {
                    return Op::Fail(Cause::Die(defect));
                }
                trace!(fiber = %fiber, "stm defect on a stale journal, restarting");
                continue;
            }
            TExit::Retry => {
                if journal.is_valid() {
                    return await_change(stm, fiber, journal);
                }
                continue;
            }
        };
        match journal.commit() {
            Some(todos) => {
                for todo in todos {
                    todo();
                }
                return done;
            }
            None => trace!(fiber = %fiber, "stm conflict, restarting"),
        }
    }
}

/// Suspends until a ref read by `journal` changes, then runs another
/// attempt.
fn await_change<A: Data, E: Data>(stm: Stm<A, E>, fiber: FiberId, journal: Journal) -> Op {
    let refs: Arc<Vec<Arc<dyn ErasedTRef>>> = Arc::new(journal.read_refs());
    let journal = Arc::new(journal);
    let waiter = fiber.clone();
    let registered = Arc::clone(&refs);
    let wait = Op::async_op(FiberId::None, move |resumer| {
        let woken = Arc::new(AtomicBool::new(false));
        let todo: super::tref::Todo = Arc::new(move || {
            if !woken.swap(true, Ordering::AcqRel) {
                resumer.resume(Op::unit());
            }
        });
        for tref in registered.iter() {
            tref.add_todo(waiter.clone(), Arc::clone(&todo));
        }
        // A commit between the attempt and the registration above would
        // have found no todo to run.
        if !journal.is_valid() {
            todo();
        }
        let registered = Arc::clone(&registered);
        let waiter = waiter.clone();
        Some(Op::sync(move || {
            remove_todos(&registered, &waiter);
            Ok(erase(()))
        }))
    });
    wait.flat_map(move |_| {
        remove_todos(&refs, &fiber);
        attempt(stm.clone(), fiber.clone())
    })
}

fn remove_todos(refs: &[Arc<dyn ErasedTRef>], fiber: &FiberId) {
    for tref in refs {
        tref.remove_todo(fiber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stm::TRef;

    fn run_once<A: Data, E: Data>(stm: &Stm<A, E>) -> (TExit<A, E>, Journal) {
        let mut journal = Journal::new();
        let exit = stm.run(&mut journal);
        (exit, journal)
    }

    #[test]
    fn flat_map_threads_the_journal() {
        let r = TRef::new(1u32);
        let read = r.clone();
        let stm: Stm<u32> = r
            .update(|n| n + 1)
            .flat_map(move |()| read.get());
        let (exit, journal) = run_once(&stm);
        assert!(matches!(exit, TExit::Succeed(2)));
        assert_eq!(r.peek(), 1);
        assert!(journal.commit().is_some());
        assert_eq!(r.peek(), 2);
    }

    #[test]
    fn or_else_rolls_back_the_retrying_branch() {
        let r = TRef::new(0u32);
        let left: Stm<u32> = r.set(99).and_then(Stm::retry());
        let right: Stm<u32> = r.get();
        let (exit, _) = run_once(&left.or_else(right));
        assert!(matches!(exit, TExit::Succeed(0)));
    }

    #[test]
    fn or_else_keeps_first_success() {
        let stm: Stm<u8> = Stm::succeed(1).or_else(Stm::succeed(2));
        assert!(matches!(run_once(&stm).0, TExit::Succeed(1)));
    }

    #[test]
    fn catch_all_recovers_typed_failure_only() {
        let failed: Stm<u8, String> = Stm::fail("bad".into());
        let recovered: Stm<u8, String> = failed.catch_all(|e| Stm::succeed(e.len() as u8));
        assert!(matches!(run_once(&recovered).0, TExit::Succeed(3)));

        let died: Stm<u8, String> = Stm::die("boom");
        let still: Stm<u8, String> = died.catch_all(|_| Stm::succeed(0));
        assert!(matches!(run_once(&still).0, TExit::Die(_)));
    }

    #[test]
    fn check_retries_when_false() {
        let ok: Stm<()> = Stm::check(true);
        let no: Stm<()> = Stm::check(false);
        assert!(matches!(run_once(&ok).0, TExit::Succeed(())));
        assert!(matches!(run_once(&no).0, TExit::Retry));
    }

    #[test]
    fn zip_and_map_err() {
        let a = TRef::new(2u32);
        let b = TRef::new(3u32);
        let stm: Stm<(u32, u32), u8> = a.get().zip(b.get());
        assert!(matches!(run_once(&stm).0, TExit::Succeed((2, 3))));
        let failing: Stm<u32, String> = Stm::<u32, u8>::fail(4).map_err(|n| n.to_string());
        assert!(matches!(run_once(&failing).0, TExit::Fail(ref s) if s == "4"));
    }
}
