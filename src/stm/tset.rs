//! Transactional sets.

use super::stm::Stm;
use super::tmap::TMap;
use crate::effect::Data;
use std::hash::Hash;

/// A set stored as a [`TMap`] with unit values.
pub struct TSet<A> {
    map: TMap<A, ()>,
}

impl<A> Clone for TSet<A> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<A: Data + Eq + Hash> TSet<A> {
    /// Creates an empty set outside any transaction.
    #[must_use]
    pub fn new() -> Self {
        Self { map: TMap::new() }
    }

    /// Creates a set from items as part of a transaction.
    #[must_use]
    pub fn from_items<E: Data>(items: impl IntoIterator<Item = A>) -> Stm<Self, E> {
        TMap::from_pairs(items.into_iter().map(|a| (a, ()))).map(|map| Self { map })
    }

    /// Adds `item`.
    #[must_use]
    pub fn add<E: Data>(&self, item: A) -> Stm<(), E> {
        self.map.put(item, ())
    }

    /// Removes `item`; `true` if it was present.
    #[must_use]
    pub fn remove<E: Data>(&self, item: A) -> Stm<bool, E> {
        self.map.remove(item).map(|old| old.is_some())
    }

    /// Returns `true` if `item` is present.
    #[must_use]
    pub fn contains<E: Data>(&self, item: A) -> Stm<bool, E> {
        self.map.contains_key(item)
    }

    /// Number of items.
    #[must_use]
    pub fn size<E: Data>(&self) -> Stm<usize, E> {
        self.map.size()
    }

    /// All items, in unspecified order.
    #[must_use]
    pub fn to_vec<E: Data>(&self) -> Stm<Vec<A>, E> {
        self.map.keys()
    }
}

impl<A: Data + Eq + Hash> Default for TSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stm::journal::Journal;
    use crate::stm::stm::TExit;

    fn value<A: Data>(stm: &Stm<A>, journal: &mut Journal) -> A {
        match stm.run(journal) {
            TExit::Succeed(a) => a,
            _ => panic!("transaction did not succeed"),
        }
    }

    #[test]
    fn add_contains_remove() {
        let set: TSet<u8> = TSet::new();
        let mut journal = Journal::new();
        value(&set.add(3), &mut journal);
        value(&set.add(3), &mut journal);
        assert_eq!(value(&set.size(), &mut journal), 1);
        assert!(value(&set.contains(3), &mut journal));
        assert!(value(&set.remove(3), &mut journal));
        assert!(!value(&set.remove(3), &mut journal));
        assert!(value(&set.to_vec(), &mut journal).is_empty());
    }
}
