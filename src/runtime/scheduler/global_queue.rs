//! Global run queue.
//!
//! A lock-free unbounded MPMC queue of runnable fibers, shared by every
//! worker. Fibers are pushed when first started, when resumed and when they
//! yield.

use crate::runtime::fiber::Fiber;
use crossbeam_queue::SegQueue;
use std::sync::Arc;

/// The shared run queue.
#[derive(Default)]
pub(crate) struct GlobalQueue {
    inner: SegQueue<Arc<Fiber>>,
}

impl GlobalQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    pub(crate) fn push(&self, fiber: Arc<Fiber>) {
        self.inner.push(fiber);
    }

    pub(crate) fn pop(&self) -> Option<Arc<Fiber>> {
        self.inner.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    /// Drops every queued fiber.
    pub(crate) fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.inner.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}
