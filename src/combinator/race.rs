//! Races: run effects concurrently and keep the first to finish.
//!
//! The winner's exit is the result, whether it succeeded or failed. Losers
//! are interrupted and awaited before the race completes, so their
//! finalizers have run by then. Their interruption is not reported.
//!
//! # Algebraic Laws
//!
//! - Identity: `race(a, never) ≃ a`
//! - Commutativity up to ties: `race(a, b) ≃ race(b, a)`

use super::par::{fork_all, interrupt_children, raws};
use crate::effect::{Data, Effect};
use crate::runtime::fiber::await_first;
use crate::runtime::FiberHandle;
use crate::tracing_compat::trace;
use std::sync::Arc;

/// Runs `left` and `right` concurrently; the first to finish wins.
#[must_use]
pub fn race<A: Data, E: Data>(left: Effect<A, E>, right: Effect<A, E>) -> Effect<A, E> {
    race_all(vec![left, right])
}

/// Runs every effect concurrently; the first to finish wins.
///
/// An empty race is a defect.
#[must_use]
pub fn race_all<A: Data, E: Data>(effects: impl IntoIterator<Item = Effect<A, E>>) -> Effect<A, E> {
    let effects: Vec<Effect<A, E>> = effects.into_iter().collect();
    if effects.is_empty() {
        return Effect::die("race_all needs at least one effect");
    }
    Effect::uninterruptible_mask(move |restore| {
        fork_all(effects.clone(), restore).flat_map(move |handles| {
            let fibers = raws(&handles);
            let first: Effect<usize, E> = Effect::from_op(await_first(fibers.clone()));
            restore
                .apply(first)
                .on_interrupt(interrupt_children(fibers.clone()))
                .flat_map(move |index| settle(&handles, index))
        })
    })
}

/// Interrupts the losers, then completes with the winner's exit.
fn settle<A: Data, E: Data>(handles: &[FiberHandle<A, E>], index: usize) -> Effect<A, E> {
    let Some(winner) = handles.get(index).cloned() else {
        return Effect::die("race winner out of range");
    };
    trace!(winner = %winner.id(), contenders = handles.len(), "race settled");
    let losers = handles
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, h)| Arc::clone(h.raw()))
        .collect();
    let inherit = winner.clone();
    interrupt_children(losers)
        .widen::<E>()
        .and_then(winner.await_exit())
        .flat_map(move |exit| {
            let from = Effect::from_exit(exit.clone());
            if exit.is_success() {
                inherit.inherit_refs().and_then(from)
            } else {
                from
            }
        })
}

impl<A: Data, E: Data> Effect<A, E> {
    /// Races `self` against `that`; the first to finish wins.
    #[must_use]
    pub fn race(self, that: Self) -> Self {
        race(self, that)
    }
}
