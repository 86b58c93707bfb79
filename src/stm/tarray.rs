//! Fixed-size arrays of transactional refs.

use super::stm::{Stm, TExit};
use super::tref::TRef;
use crate::effect::Data;
use crate::types::Defect;
use std::sync::Arc;

/// An array whose elements are independent [`TRef`]s, so transactions on
/// different indices do not conflict.
pub struct TArray<A> {
    refs: Arc<Vec<TRef<A>>>,
}

impl<A> Clone for TArray<A> {
    fn clone(&self) -> Self {
        Self {
            refs: Arc::clone(&self.refs),
        }
    }
}

fn out_of_bounds<A, E>(index: usize, len: usize) -> TExit<A, E> {
    TExit::Die(Defect::new(format!(
        "TArray index {index} out of bounds for length {len}"
    )))
}

impl<A: Data> TArray<A> {
    /// Creates an array outside any transaction.
    #[must_use]
    pub fn from_vec(values: Vec<A>) -> Self {
        Self {
            refs: Arc::new(values.into_iter().map(TRef::new).collect()),
        }
    }

    /// Creates an array as part of a transaction.
    #[must_use]
    pub fn make<E: Data>(values: Vec<A>) -> Stm<Self, E> {
        Stm::new(move |_| TExit::Succeed(Self::from_vec(values.clone())))
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns `true` for an empty array.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Reads element `index`. Out of bounds is a defect.
    #[must_use]
    pub fn get<E: Data>(&self, index: usize) -> Stm<A, E> {
        let this = self.clone();
        Stm::new(move |journal| match this.refs.get(index) {
            Some(tref) => TExit::Succeed(journal.read(tref)),
            None => out_of_bounds(index, this.len()),
        })
    }

    /// Writes element `index`. Out of bounds is a defect.
    #[must_use]
    pub fn set<E: Data>(&self, index: usize, value: A) -> Stm<(), E> {
        self.update(index, move |_| value.clone())
    }

    /// Applies `f` to element `index`. Out of bounds is a defect.
    #[must_use]
    pub fn update<E: Data>(&self, index: usize, f: impl Fn(A) -> A + Send + Sync + 'static) -> Stm<(), E> {
        let this = self.clone();
        Stm::new(move |journal| match this.refs.get(index) {
            Some(tref) => {
                let next = f(journal.read(tref));
                journal.write(tref, next);
                TExit::Succeed(())
            }
            None => out_of_bounds(index, this.len()),
        })
    }

    /// Index of the first element satisfying `pred`.
    ///
    /// Only the elements up to the match are read, so writes to later
    /// elements do not conflict with this transaction.
    #[must_use]
    pub fn index_where<E: Data>(&self, pred: impl Fn(&A) -> bool + Send + Sync + 'static) -> Stm<Option<usize>, E> {
        let this = self.clone();
        Stm::new(move |journal| {
            for (i, tref) in this.refs.iter().enumerate() {
                if pred(&journal.read(tref)) {
                    return TExit::Succeed(Some(i));
                }
            }
            TExit::Succeed(None)
        })
    }

    /// First element satisfying `pred`.
    #[must_use]
    pub fn find<E: Data>(&self, pred: impl Fn(&A) -> bool + Send + Sync + 'static) -> Stm<Option<A>, E> {
        let this = self.clone();
        Stm::new(move |journal| {
            for tref in this.refs.iter() {
                let value = journal.read(tref);
                if pred(&value) {
                    return TExit::Succeed(Some(value));
                }
            }
            TExit::Succeed(None)
        })
    }

    /// Folds the elements left to right.
    #[must_use]
    pub fn fold<Z: Data, E: Data>(&self, zero: Z, f: impl Fn(Z, A) -> Z + Send + Sync + 'static) -> Stm<Z, E> {
        let this = self.clone();
        Stm::new(move |journal| {
            let mut acc = zero.clone();
            for tref in this.refs.iter() {
                acc = f(acc, journal.read(tref));
            }
            TExit::Succeed(acc)
        })
    }

    /// All elements, in order.
    #[must_use]
    pub fn to_vec<E: Data>(&self) -> Stm<Vec<A>, E> {
        self.fold(Vec::with_capacity(self.len()), |mut acc, a| {
            acc.push(a);
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stm::journal::Journal;

    fn run<A: Data, E: Data>(stm: &Stm<A, E>, journal: &mut Journal) -> TExit<A, E> {
        stm.run(journal)
    }

    #[test]
    fn get_set_and_fold() {
        let array = TArray::from_vec(vec![1u32, 2, 3]);
        let mut journal = Journal::new();
        let set: Stm<()> = array.set(1, 20);
        assert!(matches!(run(&set, &mut journal), TExit::Succeed(())));
        let sum: Stm<u32> = array.fold(0, |acc, n| acc + n);
        assert!(matches!(run(&sum, &mut journal), TExit::Succeed(24)));
        let all: Stm<Vec<u32>> = array.to_vec();
        assert!(matches!(run(&all, &mut journal), TExit::Succeed(ref v) if v == &vec![1, 20, 3]));
    }

    #[test]
    fn out_of_bounds_dies() {
        let array = TArray::from_vec(vec![1u8]);
        let get: Stm<u8> = array.get(5);
        match run(&get, &mut Journal::new()) {
            TExit::Die(defect) => assert!(defect.message().contains("out of bounds")),
            _ => panic!("expected defect"),
        }
    }

    #[test]
    fn index_where_reads_only_a_prefix() {
        let array = TArray::from_vec(vec![1u8, 5, 9]);
        let mut journal = Journal::new();
        let idx: Stm<Option<usize>> = array.index_where(|n| *n > 3);
        assert!(matches!(run(&idx, &mut journal), TExit::Succeed(Some(1))));
        assert_eq!(journal.len(), 2);
        let found: Stm<Option<u8>> = array.find(|n| *n > 100);
        assert!(matches!(run(&found, &mut journal), TExit::Succeed(None)));
    }
}
