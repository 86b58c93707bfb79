//! Transaction journals.
//!
//! A journal records, per transactional ref touched by one attempt, the
//! version seen on first access, the value the attempt currently sees and
//! whether the attempt changed it. Nothing is shared until the journal is
//! committed under the global commit lock.

use super::tref::{ErasedTRef, TRef, TRefId, Todo};
use crate::effect::op::erase;
use crate::effect::{AnyValue, Data};
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Serialises validation and publication of every commit.
static COMMIT_LOCK: Mutex<()> = parking_lot::const_mutex(());

#[derive(Clone)]
struct Entry {
    tref: Arc<dyn ErasedTRef>,
    expected_version: u64,
    original: AnyValue,
    value: AnyValue,
    read: bool,
    changed: bool,
}

impl Entry {
    fn is_valid(&self) -> bool {
        self.tref.version() == self.expected_version
    }
}

/// The reads and tentative writes of one transaction attempt.
#[derive(Clone, Default)]
pub struct Journal {
    entries: BTreeMap<TRefId, Entry>,
}

impl Journal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn entry<A: Data>(&mut self, tref: &TRef<A>) -> &mut Entry {
        self.entries.entry(tref.id()).or_insert_with(|| {
            let erased = tref.erased();
            let (value, version) = erased.load();
            Entry {
                tref: erased,
                expected_version: version,
                original: Arc::clone(&value),
                value,
                read: false,
                changed: false,
            }
        })
    }

    /// The value of `tref` as this attempt sees it.
    pub(crate) fn read<A: Data>(&mut self, tref: &TRef<A>) -> A {
        let entry = self.entry(tref);
        entry.read = true;
        match entry.value.downcast_ref::<A>() {
            Some(value) => value.clone(),
            None => tref.peek(),
        }
    }

    /// Records a tentative write.
    pub(crate) fn write<A: Data>(&mut self, tref: &TRef<A>, value: A) {
        let entry = self.entry(tref);
        entry.value = erase(value);
        entry.changed = true;
    }

    /// Number of refs touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no ref was touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` when every ref still has the version seen on first
    /// access.
    pub(crate) fn is_valid(&self) -> bool {
        self.entries.values().all(Entry::is_valid)
    }

    /// Rolls back to `snapshot`, keeping refs first touched after it as
    /// unchanged reads so they are still validated and waited on.
    pub(crate) fn reset_to(&mut self, snapshot: Self) {
        let mut restored = snapshot.entries;
        for (id, entry) in std::mem::take(&mut self.entries) {
            restored.entry(id).or_insert_with(|| Entry {
                value: Arc::clone(&entry.original),
                changed: false,
                ..entry
            });
        }
        self.entries = restored;
    }

    /// Validates and publishes the journal atomically.
    ///
    /// Returns the wake-ups registered on changed refs, to be run after the
    /// lock is released, or `None` if another commit got in first.
    pub(crate) fn commit(self) -> Option<Vec<Todo>> {
        let _guard = COMMIT_LOCK.lock();
        if !self.is_valid() {
            return None;
        }
        let mut todos = Vec::new();
        for entry in self.entries.into_values().filter(|e| e.changed) {
            entry.tref.store(entry.value);
            todos.extend(entry.tref.take_todos());
        }
        if !todos.is_empty() {
            trace!(woken = todos.len(), "stm commit wakes waiters");
        }
        Some(todos)
    }

    /// Refs this attempt actually read.
    pub(crate) fn read_refs(&self) -> Vec<Arc<dyn ErasedTRef>> {
        self.entries
            .values()
            .filter(|e| e.read)
            .map(|e| Arc::clone(&e.tref))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_see_own_writes() {
        let r = TRef::new(1u32);
        let mut journal = Journal::new();
        assert_eq!(journal.read(&r), 1);
        journal.write(&r, 5);
        assert_eq!(journal.read(&r), 5);
        assert_eq!(r.peek(), 1);
    }

    #[test]
    fn commit_publishes_and_bumps_version() {
        let r = TRef::new(1u32);
        let mut journal = Journal::new();
        journal.write(&r, 2);
        assert!(journal.commit().is_some());
        assert_eq!(r.peek(), 2);
        assert_eq!(r.erased().version(), 1);
    }

    #[test]
    fn stale_journal_does_not_commit() {
        let r = TRef::new(1u32);
        let mut stale = Journal::new();
        let seen = stale.read(&r);
        stale.write(&r, seen + 1);

        let mut other = Journal::new();
        other.write(&r, 10);
        assert!(other.commit().is_some());

        assert!(!stale.is_valid());
        assert!(stale.commit().is_none());
        assert_eq!(r.peek(), 10);
    }

    #[test]
    fn reset_keeps_later_reads_but_drops_writes() {
        let a = TRef::new(1u32);
        let b = TRef::new(2u32);
        let mut journal = Journal::new();
        journal.write(&a, 7);
        let snapshot = journal.clone();
        journal.write(&a, 8);
        let _ = journal.read(&b);
        journal.write(&b, 9);
        journal.reset_to(snapshot);
        assert_eq!(journal.read(&a), 7);
        assert_eq!(journal.read(&b), 2);
        assert_eq!(journal.len(), 2);
    }

    #[test]
    fn only_read_refs_are_reported() {
        let a = TRef::new(1u32);
        let b = TRef::new(2u32);
        let mut journal = Journal::new();
        let _ = journal.read(&a);
        journal.write(&b, 3);
        let read: Vec<TRefId> = journal.read_refs().iter().map(|r| r.id()).collect();
        assert_eq!(read, vec![a.id()]);
    }
}
