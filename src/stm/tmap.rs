//! Transactional hash maps.

use super::stm::Stm;
use super::tref::TRef;
use crate::effect::Data;
use std::collections::HashMap;
use std::hash::Hash;

/// A hash map held in a single [`TRef`].
///
/// Every write replaces the whole map, so concurrent writers to different
/// keys still conflict. Keep maps small or partition them.
pub struct TMap<K, V> {
    tref: TRef<HashMap<K, V>>,
}

impl<K, V> Clone for TMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            tref: self.tref.clone(),
        }
    }
}

impl<K, V> TMap<K, V>
where
    K: Data + Eq + Hash,
    V: Data,
{
    /// Creates an empty map outside any transaction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tref: TRef::new(HashMap::new()),
        }
    }

    /// Creates an empty map as part of a transaction.
    #[must_use]
    pub fn empty<E: Data>() -> Stm<Self, E> {
        TRef::make(HashMap::new()).map(|tref| Self { tref })
    }

    /// Creates a map from pairs as part of a transaction.
    #[must_use]
    pub fn from_pairs<E: Data>(pairs: impl IntoIterator<Item = (K, V)>) -> Stm<Self, E> {
        TRef::make(pairs.into_iter().collect()).map(|tref| Self { tref })
    }

    /// Value for `key`.
    #[must_use]
    pub fn get<E: Data>(&self, key: K) -> Stm<Option<V>, E> {
        self.tref.get().map(move |map| map.get(&key).cloned())
    }

    /// Inserts or replaces the value for `key`.
    #[must_use]
    pub fn put<E: Data>(&self, key: K, value: V) -> Stm<(), E> {
        self.tref.update(move |mut map| {
            map.insert(key.clone(), value.clone());
            map
        })
    }

    /// Removes `key`, returning its value.
    #[must_use]
    pub fn remove<E: Data>(&self, key: K) -> Stm<Option<V>, E> {
        self.tref.modify(move |mut map| {
            let removed = map.remove(&key);
            (removed, map)
        })
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key<E: Data>(&self, key: K) -> Stm<bool, E> {
        self.tref.get().map(move |map| map.contains_key(&key))
    }

    /// All keys, in unspecified order.
    #[must_use]
    pub fn keys<E: Data>(&self) -> Stm<Vec<K>, E> {
        self.tref.get().map(|map| map.into_keys().collect())
    }

    /// All values, in unspecified order.
    #[must_use]
    pub fn values<E: Data>(&self) -> Stm<Vec<V>, E> {
        self.tref.get().map(|map| map.into_values().collect())
    }

    /// Number of entries.
    #[must_use]
    pub fn size<E: Data>(&self) -> Stm<usize, E> {
        self.tref.get().map(|map| map.len())
    }

    /// A copy of the whole map.
    #[must_use]
    pub fn to_map<E: Data>(&self) -> Stm<HashMap<K, V>, E> {
        self.tref.get()
    }
}

impl<K, V> Default for TMap<K, V>
where
    K: Data + Eq + Hash,
    V: Data,
{
    fn default() -> Self {
        Self::new()
    }
}
