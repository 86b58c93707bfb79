//! Parallel composition: run effects on child fibers and wait for all.
//!
//! The first failure cuts the wait short. The remaining siblings are
//! interrupted and awaited, and the interruptions this combinator caused
//! are dropped from the resulting cause, so only real failures show.
//! Several real failures are kept side by side with [`Cause::Both`].

use crate::effect::op::{downcast, erase, restore_cause, Op};
use crate::effect::{AnyValue, Data, Effect};
use crate::runtime::fiber::{await_all_or_failure, interrupt_all, Fiber};
use crate::runtime::FiberHandle;
use crate::tracing_compat::trace;
use crate::types::{Cause, Exit, FiberId};
use std::convert::Infallible;
use std::sync::Arc;

/// Interrupts `fibers` on behalf of the calling fiber and waits for them.
pub(crate) fn interrupt_children(fibers: Vec<Arc<Fiber>>) -> Effect<(), Infallible> {
    Effect::from_op(Op::with_fiber(move |scope| {
        interrupt_all(fibers.clone(), scope.fiber.id().clone())
    }))
}

pub(crate) fn raws<A: Data, E: Data>(handles: &[FiberHandle<A, E>]) -> Vec<Arc<Fiber>> {
    handles.iter().map(|h| Arc::clone(h.raw())).collect()
}

/// Starts every effect on a supervised child, forwarding the caller's
/// interruptibility to the children.
pub(crate) fn fork_all<A: Data, E: Data>(
    effects: Vec<Effect<A, E>>,
    restore: crate::effect::Restore,
) -> Effect<Vec<FiberHandle<A, E>>, E> {
    Effect::<FiberHandle<A, E>, E>::for_each(effects, |effect| restore.apply(effect).fork())
}

/// Combines child exits, dropping interruptions requested by `me`.
fn combine<A: Data, E: Data>(exits: Vec<Exit<A, E>>, me: &FiberId) -> Exit<Vec<A>, E> {
    let mut values = Vec::with_capacity(exits.len());
    let mut raw = Cause::Empty;
    for exit in exits {
        match exit {
            Exit::Success(a) => values.push(a),
            Exit::Failure(cause) => raw = raw.both(cause),
        }
    }
    if raw.is_empty() {
        return Exit::Success(values);
    }
    let stripped = raw.clone().strip_interrupts_by(me);
    Exit::Failure(if stripped.is_empty() { raw } else { stripped })
}

/// Runs every effect concurrently and collects the values in input order.
///
/// Fails as soon as any child fails; the other children are interrupted
/// first. FiberRefs of successful children are merged into the caller in
/// input order.
#[must_use]
pub fn collect_all_par<A: Data, E: Data>(
    effects: impl IntoIterator<Item = Effect<A, E>>,
) -> Effect<Vec<A>, E> {
    let effects: Vec<Effect<A, E>> = effects.into_iter().collect();
    if effects.is_empty() {
        return Effect::succeed(Vec::new());
    }
    Effect::uninterruptible_mask(move |restore| {
        fork_all(effects.clone(), restore).flat_map(move |handles| {
            let fibers = raws(&handles);
            let wait: Effect<bool, E> = Effect::from_op(await_all_or_failure(fibers.clone()));
            let cleanup = interrupt_children(fibers.clone());
            restore
                .apply(wait)
                .on_interrupt(cleanup)
                .flat_map(move |failed| {
                    if failed {
                        trace!(children = handles.len(), "parallel branch failed, interrupting siblings");
                    }
                    let handles = handles.clone();
                    interrupt_children(fibers.clone())
                        .widen::<E>()
                        .and_then(Effect::<FiberId, E>::fiber_id())
                        .flat_map(move |me| {
                            let handles = handles.clone();
                            Effect::<Exit<A, E>, E>::for_each(handles.clone(), |h| h.await_exit())
                                .flat_map(move |exits| merge_exits(&handles, exits, &me))
                        })
                })
        })
    })
}

/// Merges FiberRefs of successful children, then completes with the
/// combined exit.
fn merge_exits<A: Data, E: Data>(
    handles: &[FiberHandle<A, E>],
    exits: Vec<Exit<A, E>>,
    me: &FiberId,
) -> Effect<Vec<A>, E> {
    let succeeded: Vec<FiberHandle<A, E>> = handles
        .iter()
        .zip(&exits)
        .filter(|(_, exit)| exit.is_success())
        .map(|(h, _)| h.clone())
        .collect();
    let merged = Effect::<(), E>::for_each(succeeded, |h| h.inherit_refs());
    merged.and_then(Effect::from_exit(combine(exits, me)))
}

/// Applies `f` to every item concurrently.
pub fn for_each_par<T, A: Data, E: Data>(
    items: impl IntoIterator<Item = T>,
    f: impl Fn(T) -> Effect<A, E>,
) -> Effect<Vec<A>, E> {
    collect_all_par(items.into_iter().map(f))
}

/// Runs two effects concurrently and pairs their values.
#[must_use]
pub fn zip_par<A: Data, B: Data, E: Data>(left: Effect<A, E>, right: Effect<B, E>) -> Effect<(A, B), E> {
    collect_all_par(vec![left.map(erase), right.map(erase)]).flat_map(|values: Vec<AnyValue>| {
        let mut values = values.into_iter();
        match (values.next(), values.next()) {
            (Some(a), Some(b)) => match (downcast::<A>(a), downcast::<B>(b)) {
                (Ok(a), Ok(b)) => Effect::succeed((a, b)),
                (Err(cause), _) | (_, Err(cause)) => Effect::fail_cause(restore_cause(cause)),
            },
            _ => Effect::die("zip_par lost a branch"),
        }
    })
}

impl<A: Data, E: Data> Effect<A, E> {
    /// Runs `self` and `that` concurrently and pairs their values.
    #[must_use]
    pub fn zip_par<B: Data>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        zip_par(self, that)
    }

    /// Runs the effects concurrently, collecting their values in order.
    #[must_use]
    pub fn collect_all_par(effects: impl IntoIterator<Item = Self>) -> Effect<Vec<A>, E> {
        collect_all_par(effects)
    }
}
