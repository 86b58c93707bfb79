//! Bounded queues between fibers.

use crate::effect::{Data, Effect};
use crate::stm::TQueue;

/// A FIFO queue. `offer` suspends while the queue is full and `take`
/// while it is empty.
pub struct Queue<A> {
    inner: TQueue<A>,
}

impl<A> Clone for Queue<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A> std::fmt::Debug for Queue<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").finish_non_exhaustive()
    }
}

impl<A: Data> Queue<A> {
    /// A queue holding at most `capacity` items.
    #[must_use]
    pub fn new_bounded(capacity: usize) -> Self {
        Self {
            inner: TQueue::new_bounded(capacity),
        }
    }

    /// A queue without a size limit.
    #[must_use]
    pub fn new_unbounded() -> Self {
        Self {
            inner: TQueue::new_unbounded(),
        }
    }

    /// Creates a bounded queue.
    #[must_use]
    pub fn bounded<E: Data>(capacity: usize) -> Effect<Self, E> {
        Effect::sync(move || Self::new_bounded(capacity))
    }

    /// Creates an unbounded queue.
    #[must_use]
    pub fn unbounded<E: Data>() -> Effect<Self, E> {
        Effect::sync(Self::new_unbounded)
    }

    /// Maximum number of items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Appends `item`, waiting while full.
    #[must_use]
    pub fn offer<E: Data>(&self, item: A) -> Effect<(), E> {
        self.inner.offer(item).commit()
    }

    /// Removes the oldest item, waiting while empty.
    #[must_use]
    pub fn take<E: Data>(&self) -> Effect<A, E> {
        self.inner.take().commit()
    }

    /// Removes the oldest item if there is one.
    #[must_use]
    pub fn poll<E: Data>(&self) -> Effect<Option<A>, E> {
        self.inner.poll().commit()
    }

    /// Removes every queued item.
    #[must_use]
    pub fn take_all<E: Data>(&self) -> Effect<Vec<A>, E> {
        self.inner.take_all().commit()
    }

    /// Number of queued items.
    #[must_use]
    pub fn size<E: Data>(&self) -> Effect<usize, E> {
        self.inner.size().commit()
    }
}
