//! Transactional FIFO queues.

use super::stm::{Stm, TExit};
use super::tref::TRef;
use crate::effect::Data;
use std::collections::VecDeque;

/// A FIFO queue whose `offer` retries while full and `take` retries while
/// empty.
pub struct TQueue<A> {
    items: TRef<VecDeque<A>>,
    capacity: usize,
}

impl<A> Clone for TQueue<A> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            capacity: self.capacity,
        }
    }
}

impl<A: Data> TQueue<A> {
    /// A queue holding at most `capacity` items (at least one).
    #[must_use]
    pub fn new_bounded(capacity: usize) -> Self {
        Self {
            items: TRef::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// A queue without a size limit.
    #[must_use]
    pub fn new_unbounded() -> Self {
        Self {
            items: TRef::new(VecDeque::new()),
            capacity: usize::MAX,
        }
    }

    /// Creates a bounded queue as part of a transaction.
    #[must_use]
    pub fn bounded<E: Data>(capacity: usize) -> Stm<Self, E> {
        Stm::new(move |_| TExit::Succeed(Self::new_bounded(capacity)))
    }

    /// Creates an unbounded queue as part of a transaction.
    #[must_use]
    pub fn unbounded<E: Data>() -> Stm<Self, E> {
        Stm::new(|_| TExit::Succeed(Self::new_unbounded()))
    }

    /// Maximum number of items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `item`, retrying while the queue is full.
    #[must_use]
    pub fn offer<E: Data>(&self, item: A) -> Stm<(), E> {
        let items = self.items.clone();
        let capacity = self.capacity;
        Stm::new(move |journal| {
            let mut queue = journal.read(&items);
            if queue.len() >= capacity {
                return TExit::Retry;
            }
            queue.push_back(item.clone());
            journal.write(&items, queue);
            TExit::Succeed(())
        })
    }

    /// Removes the oldest item, retrying while the queue is empty.
    #[must_use]
    pub fn take<E: Data>(&self) -> Stm<A, E> {
        let items = self.items.clone();
        Stm::new(move |journal| {
            let mut queue = journal.read(&items);
            match queue.pop_front() {
                Some(item) => {
                    journal.write(&items, queue);
                    TExit::Succeed(item)
                }
                None => TExit::Retry,
            }
        })
    }

    /// Removes the oldest item if there is one.
    #[must_use]
    pub fn poll<E: Data>(&self) -> Stm<Option<A>, E> {
        self.items.modify(|mut queue| {
            let item = queue.pop_front();
            (item, queue)
        })
    }

    /// The oldest item without removing it, retrying while empty.
    #[must_use]
    pub fn peek<E: Data>(&self) -> Stm<A, E> {
        let items = self.items.clone();
        Stm::new(move |journal| match journal.read(&items).front() {
            Some(item) => TExit::Succeed(item.clone()),
            None => TExit::Retry,
        })
    }

    /// Removes every item.
    #[must_use]
    pub fn take_all<E: Data>(&self) -> Stm<Vec<A>, E> {
        self.items
            .modify(|queue| (queue.into_iter().collect(), VecDeque::new()))
    }

    /// Number of queued items.
    #[must_use]
    pub fn size<E: Data>(&self) -> Stm<usize, E> {
        self.items.get().map(|queue| queue.len())
    }

    /// Returns `true` when no item is queued.
    #[must_use]
    pub fn is_empty<E: Data>(&self) -> Stm<bool, E> {
        self.items.get().map(|queue| queue.is_empty())
    }

    /// Returns `true` when `offer` would retry.
    #[must_use]
    pub fn is_full<E: Data>(&self) -> Stm<bool, E> {
        let capacity = self.capacity;
        self.items.get().map(move |queue| queue.len() >= capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stm::journal::Journal;

    #[test]
    fn fifo_and_bounds() {
        let queue = TQueue::new_bounded(2);
        let mut journal = Journal::new();
        let offer = |n: u8| -> Stm<()> { queue.offer(n) };
        assert!(matches!(offer(1).run(&mut journal), TExit::Succeed(())));
        assert!(matches!(offer(2).run(&mut journal), TExit::Succeed(())));
        assert!(matches!(offer(3).run(&mut journal), TExit::Retry));
        let full: Stm<bool> = queue.is_full();
        assert!(matches!(full.run(&mut journal), TExit::Succeed(true)));
        let take: Stm<u8> = queue.take();
        assert!(matches!(take.run(&mut journal), TExit::Succeed(1)));
        let all: Stm<Vec<u8>> = queue.take_all();
        assert!(matches!(all.run(&mut journal), TExit::Succeed(ref v) if v == &vec![2]));
        assert!(matches!(take.run(&mut journal), TExit::Retry));
        let poll: Stm<Option<u8>> = queue.poll();
        assert!(matches!(poll.run(&mut journal), TExit::Succeed(None)));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue: TQueue<u8> = TQueue::new_bounded(0);
        assert_eq!(queue.capacity(), 1);
    }
}
