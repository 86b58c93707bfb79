//! Failure causes.
//!
//! A [`Cause`] keeps every failure a computation produced, together with the
//! shape in which they happened: [`Cause::Then`] for failures that occurred one
//! after another (a finalizer failing while unwinding) and [`Cause::Both`] for
//! failures on concurrent branches. Nothing is collapsed to a "first error".
//!
//! Three kinds of leaves exist:
//!
//! | Leaf | Meaning | Recovered by `catch_all` |
//! |------|---------|--------------------------|
//! | `Fail(E)` | expected, typed failure | yes |
//! | `Die(Defect)` | bug, panic, invalid argument | no |
//! | `Interrupt(FiberId)` | cooperative cancellation | no |

use crate::types::id::FiberId;
use core::fmt;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// An unexpected failure: a panic, an invalid argument, a broken invariant.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a defect with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Builds a defect from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with non-string payload".to_string());
        Self { message }
    }

    /// The defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Defect({:?})", self.message)
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Tree of everything that went wrong in a computation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cause<E> {
    /// Nothing went wrong.
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// A defect.
    Die(Defect),
    /// Interruption requested by the given fiber.
    Interrupt(FiberId),
    /// The left cause happened, then the right one.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Both causes happened concurrently.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

/// A borrowed leaf of a [`Cause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauseLeaf<'a, E> {
    /// A typed failure.
    Fail(&'a E),
    /// A defect.
    Die(&'a Defect),
    /// An interruption.
    Interrupt(&'a FiberId),
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<E> Cause<E> {
    /// A cause with a single typed failure.
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A cause with a single defect.
    pub fn die(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// A cause with a single interruption.
    pub const fn interrupt(by: FiberId) -> Self {
        Self::Interrupt(by)
    }

    /// Sequential composition. `Empty` is absorbed on either side.
    #[must_use]
    pub fn then(self, that: Self) -> Self {
        match (self.is_empty(), that.is_empty()) {
            (true, _) => that,
            (_, true) => self,
            _ => Self::Then(Box::new(self), Box::new(that)),
        }
    }

    /// Parallel composition. `Empty` is absorbed on either side.
    #[must_use]
    pub fn both(self, that: Self) -> Self {
        match (self.is_empty(), that.is_empty()) {
            (true, _) => that,
            (_, true) => self,
            _ => Self::Both(Box::new(self), Box::new(that)),
        }
    }

    /// Folds over every leaf exactly once, left to right.
    ///
    /// The traversal keeps its own work stack, so arbitrarily deep causes
    /// do not consume host stack.
    pub fn fold<'a, Z>(&'a self, init: Z, mut f: impl FnMut(Z, CauseLeaf<'a, E>) -> Z) -> Z {
        let mut acc = init;
        let mut stack: Vec<&'a Self> = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Empty => {}
                Self::Fail(e) => acc = f(acc, CauseLeaf::Fail(e)),
                Self::Die(d) => acc = f(acc, CauseLeaf::Die(d)),
                Self::Interrupt(id) => acc = f(acc, CauseLeaf::Interrupt(id)),
                Self::Then(l, r) | Self::Both(l, r) => {
                    stack.push(r);
                    stack.push(l);
                }
            }
        }
        acc
    }

    /// All leaves in left-to-right order.
    #[must_use]
    pub fn leaves(&self) -> Vec<CauseLeaf<'_, E>> {
        self.fold(Vec::new(), |mut acc, leaf| {
            acc.push(leaf);
            acc
        })
    }

    /// Returns `true` when the cause holds no leaves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fold(true, |_, _| false)
    }

    /// Typed failures in left-to-right order.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.fold(Vec::new(), |mut acc, leaf| {
            if let CauseLeaf::Fail(e) = leaf {
                acc.push(e);
            }
            acc
        })
    }

    /// Defects in left-to-right order.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        self.fold(Vec::new(), |mut acc, leaf| {
            if let CauseLeaf::Die(d) = leaf {
                acc.push(d);
            }
            acc
        })
    }

    /// Every fiber that requested interruption.
    #[must_use]
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        self.fold(BTreeSet::new(), |mut acc, leaf| {
            if let CauseLeaf::Interrupt(id) = leaf {
                acc.insert(id.clone());
            }
            acc
        })
    }

    /// Returns `true` if the cause has a typed failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.fold(false, |acc, leaf| acc || matches!(leaf, CauseLeaf::Fail(_)))
    }

    /// Returns `true` if the cause has a defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.fold(false, |acc, leaf| acc || matches!(leaf, CauseLeaf::Die(_)))
    }

    /// Returns `true` if the cause has an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.fold(false, |acc, leaf| {
            acc || matches!(leaf, CauseLeaf::Interrupt(_))
        })
    }

    /// Same as [`Cause::is_interrupted`].
    #[must_use]
    pub fn contains_interrupt(&self) -> bool {
        self.is_interrupted()
    }

    /// Same as [`Cause::is_die`].
    #[must_use]
    pub fn contains_die(&self) -> bool {
        self.is_die()
    }

    /// Returns `true` if every leaf is an interruption (and there is one).
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        let (interrupts, others) = self.fold((0usize, 0usize), |(i, o), leaf| match leaf {
            CauseLeaf::Interrupt(_) => (i + 1, o),
            _ => (i, o + 1),
        });
        interrupts > 0 && others == 0
    }

    /// Transforms typed failures, keeping the tree shape.
    pub fn map<E2>(self, f: impl Fn(E) -> E2) -> Cause<E2> {
        self.map_ref(&f)
    }

    fn map_ref<E2>(self, f: &dyn Fn(E) -> E2) -> Cause<E2> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(l, r) => Cause::Then(Box::new(l.map_ref(f)), Box::new(r.map_ref(f))),
            Self::Both(l, r) => Cause::Both(Box::new(l.map_ref(f)), Box::new(r.map_ref(f))),
        }
    }

    /// Drops every interruption leaf, re-normalising empty branches.
    #[must_use]
    pub fn strip_interrupts(self) -> Self {
        match self {
            Self::Interrupt(_) => Self::Empty,
            Self::Then(l, r) => l.strip_interrupts().then(r.strip_interrupts()),
            Self::Both(l, r) => l.strip_interrupts().both(r.strip_interrupts()),
            other => other,
        }
    }

    /// Drops interruptions requested by `by`.
    #[must_use]
    pub fn strip_interrupts_by(self, by: &FiberId) -> Self {
        match self {
            Self::Interrupt(id) if by.singles().is_superset(&id.singles()) => Self::Empty,
            Self::Then(l, r) => l.strip_interrupts_by(by).then(r.strip_interrupts_by(by)),
            Self::Both(l, r) => l.strip_interrupts_by(by).both(r.strip_interrupts_by(by)),
            other => other,
        }
    }

    /// Splits a cause into its first typed failure, if it may be recovered.
    ///
    /// A failure is recoverable only when no defect sits next to it. Any
    /// interruption leaves beside a recoverable failure are dropped, because a
    /// handler only runs when the fiber itself is not being interrupted.
    pub fn failure_or_cause(self) -> Result<E, Self> {
        if self.is_die() || !self.is_failure() {
            return Err(self);
        }
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Fail(e) => return Ok(e),
                Self::Then(l, r) | Self::Both(l, r) => {
                    stack.push(*r);
                    stack.push(*l);
                }
                _ => {}
            }
        }
        Err(Self::Empty)
    }

    /// The first typed failure, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&E> {
        self.failures().into_iter().next()
    }
}

impl<E: fmt::Debug> Cause<E> {
    /// Renders the whole tree, one node per line.
    #[must_use]
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<(&Self, usize)> = vec![(self, 0)];
        while let Some((node, depth)) = stack.pop() {
            let indent = "  ".repeat(depth);
            let _ = match node {
                Self::Empty => writeln!(out, "{indent}Empty"),
                Self::Fail(e) => writeln!(out, "{indent}Fail({e:?})"),
                Self::Die(d) => writeln!(out, "{indent}Die({})", d.message()),
                Self::Interrupt(id) => writeln!(out, "{indent}Interrupt({id})"),
                Self::Then(l, r) => {
                    stack.push((r, depth + 1));
                    stack.push((l, depth + 1));
                    writeln!(out, "{indent}Then")
                }
                Self::Both(l, r) => {
                    stack.push((r, depth + 1));
                    stack.push((l, depth + 1));
                    writeln!(out, "{indent}Both")
                }
            };
        }
        out
    }
}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pretty().trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deep_then(depth: usize) -> Cause<u32> {
        let mut cause = Cause::fail(0);
        for i in 1..depth {
            cause = Cause::Then(Box::new(cause), Box::new(Cause::fail(i as u32)));
        }
        cause
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn empty_is_absorbed() {
        let c: Cause<u8> = Cause::Empty.then(Cause::fail(1));
        assert_eq!(c, Cause::fail(1));
        let c: Cause<u8> = Cause::fail(1).both(Cause::Empty);
        assert_eq!(c, Cause::fail(1));
        let c: Cause<u8> = Cause::Empty.both(Cause::Empty);
        assert!(c.is_empty());
    }

    #[test]
    fn nested_empties_count_as_empty() {
        let c: Cause<u8> = Cause::Then(Box::new(Cause::Empty), Box::new(Cause::Empty));
        assert!(c.is_empty());
    }

    // =========================================================================
    // Fold
    // =========================================================================

    #[test]
    fn fold_visits_every_leaf_once_in_order() {
        let cause = Cause::fail(1)
            .then(Cause::die("boom"))
            .both(Cause::interrupt(FiberId::single(3, 0)).then(Cause::fail(2)));
        let leaves = cause.leaves();
        assert_eq!(leaves.len(), 4);
        assert_eq!(leaves[0], CauseLeaf::Fail(&1));
        assert!(matches!(leaves[1], CauseLeaf::Die(d) if d.message() == "boom"));
        assert!(matches!(leaves[2], CauseLeaf::Interrupt(_)));
        assert_eq!(leaves[3], CauseLeaf::Fail(&2));
    }

    #[test]
    fn fold_handles_deep_trees() {
        let cause = deep_then(100_000);
        let count = cause.fold(0usize, |n, _| n + 1);
        assert_eq!(count, 100_000);
        // Tear down iteratively: the derived Drop would recurse.
        let mut stack = vec![cause];
        while let Some(node) = stack.pop() {
            if let Cause::Then(l, r) | Cause::Both(l, r) = node {
                stack.push(*l);
                stack.push(*r);
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[test]
    fn failure_or_cause_recovers_plain_failure() {
        let cause: Cause<&str> = Cause::fail("e").both(Cause::interrupt(FiberId::single(1, 0)));
        assert_eq!(cause.failure_or_cause(), Ok("e"));
    }

    #[test]
    fn failure_or_cause_refuses_defects() {
        let cause: Cause<&str> = Cause::fail("e").both(Cause::die("bug"));
        assert!(cause.failure_or_cause().is_err());
    }

    #[test]
    fn failure_or_cause_keeps_interrupt_only() {
        let id = FiberId::single(1, 0);
        let cause: Cause<&str> = Cause::interrupt(id.clone());
        assert_eq!(cause.failure_or_cause(), Err(Cause::interrupt(id)));
    }

    #[test]
    fn interrupted_only() {
        let id = FiberId::single(1, 0);
        let c: Cause<u8> = Cause::interrupt(id.clone()).both(Cause::interrupt(id));
        assert!(c.is_interrupted_only());
        let c: Cause<u8> = c.then(Cause::fail(1));
        assert!(!c.is_interrupted_only());
        assert!(c.is_interrupted());
    }

    #[test]
    fn strip_interrupts_by_keeps_foreign_interrupts() {
        let me = FiberId::single(1, 0);
        let other = FiberId::single(2, 0);
        let c: Cause<u8> = Cause::interrupt(me.clone()).both(Cause::interrupt(other.clone()));
        assert_eq!(c.strip_interrupts_by(&me), Cause::interrupt(other));
    }

    #[test]
    fn map_keeps_shape() {
        let c = Cause::fail(2).then(Cause::die("x"));
        let mapped = c.map(|n| n * 10);
        assert_eq!(mapped.failures(), vec![&20]);
        assert_eq!(mapped.defects().len(), 1);
    }

    #[test]
    fn pretty_shows_all_branches() {
        let c: Cause<&str> = Cause::fail("left").both(Cause::die("right"));
        let rendered = c.pretty();
        assert!(rendered.contains("Both"));
        assert!(rendered.contains("Fail(\"left\")"));
        assert!(rendered.contains("Die(right)"));
    }

    #[test]
    fn defect_from_panic_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(
            Defect::from_panic(payload.as_ref()).message(),
            "panic with non-string payload"
        );
    }
}
