//! Timer heap for deadline management.
//!
//! A min-heap of pending timers keyed by deadline, with lazy cancellation:
//! cancelling drops the callback and the stale heap entry is skipped when it
//! reaches the top.

use super::{TimerCallback, TimerId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TimerEntry {
    deadline: i64,
    id: TimerId,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending timers ordered by deadline, ties broken by registration order.
#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    callbacks: HashMap<TimerId, TimerCallback>,
    next_id: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of live (not cancelled) timers.
    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// An id that no timer in this heap will ever use.
    pub(crate) fn reserve_id(&mut self) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, deadline: i64, callback: TimerCallback) -> TimerId {
        let id = self.reserve_id();
        self.heap.push(TimerEntry { deadline, id });
        self.callbacks.insert(id, callback);
        id
    }

    /// Removes a timer; `false` if it already fired or was cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    fn discard_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.callbacks.contains_key(&top.id) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Earliest live deadline.
    pub(crate) fn peek_deadline(&mut self) -> Option<i64> {
        self.discard_stale();
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops the earliest timer if its deadline is at or before `now`.
    pub(crate) fn pop_expired(&mut self, now: i64) -> Option<(i64, TimerCallback)> {
        self.discard_stale();
        let top = *self.heap.peek()?;
        if top.deadline > now {
            return None;
        }
        self.heap.pop();
        self.callbacks.remove(&top.id).map(|cb| (top.deadline, cb))
    }

    /// Deadlines of every live timer, earliest first.
    pub(crate) fn deadlines(&self) -> Vec<i64> {
        let mut out: Vec<TimerEntry> = self
            .heap
            .iter()
            .filter(|e| self.callbacks.contains_key(&e.id))
            .copied()
            .collect();
        out.sort_by(|a, b| b.cmp(a));
        out.into_iter().map(|e| e.deadline).collect()
    }

    /// Drops every timer without firing it.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.callbacks.len();
        self.heap.clear();
        self.callbacks.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn noop() -> TimerCallback {
        Box::new(|| {})
    }

    #[test]
    fn earliest_first() {
        let mut heap = TimerHeap::new();
        heap.insert(100, noop());
        heap.insert(50, noop());
        heap.insert(150, noop());

        assert_eq!(heap.peek_deadline(), Some(50));
        assert_eq!(heap.pop_expired(100).map(|(d, _)| d), Some(50));
        assert_eq!(heap.pop_expired(100).map(|(d, _)| d), Some(100));
        assert!(heap.pop_expired(100).is_none());
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn cancelled_timers_are_skipped() {
        let mut heap = TimerHeap::new();
        let a = heap.insert(10, noop());
        heap.insert(20, noop());
        assert!(heap.cancel(a));
        assert!(!heap.cancel(a));
        assert_eq!(heap.peek_deadline(), Some(20));
        assert_eq!(heap.deadlines(), vec![20]);
    }

    #[test]
    fn equal_deadlines_fire_in_registration_order() {
        let mut heap = TimerHeap::new();
        let order = Arc::new(AtomicUsize::new(0));
        for expected in 0..3 {
            let order = Arc::clone(&order);
            heap.insert(
                5,
                Box::new(move || {
                    assert_eq!(order.fetch_add(1, AtomicOrdering::SeqCst), expected);
                }),
            );
        }
        while let Some((_, cb)) = heap.pop_expired(5) {
            cb();
        }
        assert_eq!(order.load(AtomicOrdering::SeqCst), 3);
    }

    #[test]
    fn clear_drops_everything() {
        let mut heap = TimerHeap::new();
        heap.insert(1, noop());
        heap.insert(2, noop());
        assert_eq!(heap.clear(), 2);
        assert_eq!(heap.peek_deadline(), None);
    }
}
