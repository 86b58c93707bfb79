//! Fiber lifecycle observation.
//!
//! A [`Supervisor`] is told when fibers start, suspend, resume and end. It
//! observes only: nothing a supervisor does changes how fibers are
//! scheduled or what they produce. Hooks run on the thread driving the fiber
//! and must not block.

use crate::effect::{AnyEffect, ErasedExit};
use crate::fiber_ref::FiberRefs;
use crate::types::FiberId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer of fiber lifecycle events.
pub trait Supervisor: Send + Sync + 'static {
    /// A fiber was created to run `effect`. `parent_refs` are the refs of
    /// the forking fiber, or the root refs for fibers started by the runtime.
    fn on_start(
        &self,
        parent_refs: &FiberRefs,
        effect: &AnyEffect,
        parent: Option<&FiberId>,
        fiber: &FiberId,
    ) {
        let _ = (parent_refs, effect, parent, fiber);
    }

    /// A fiber finished with `exit`.
    fn on_end(&self, exit: &ErasedExit, fiber: &FiberId) {
        let _ = (exit, fiber);
    }

    /// A fiber suspended on an async operation.
    fn on_suspend(&self, fiber: &FiberId) {
        let _ = fiber;
    }

    /// A suspended fiber was resumed or interrupted.
    fn on_resume(&self, fiber: &FiberId) {
        let _ = fiber;
    }
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSupervisor;

impl Supervisor for NoopSupervisor {}

/// Tracks which fibers are alive and counts lifecycle events.
#[derive(Default)]
pub struct TrackingSupervisor {
    live: Mutex<BTreeSet<FiberId>>,
    started: AtomicU64,
    ended: AtomicU64,
    failed: AtomicU64,
    suspensions: AtomicU64,
}

impl TrackingSupervisor {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fibers started and not yet ended, in id order.
    #[must_use]
    pub fn live_fibers(&self) -> Vec<FiberId> {
        self.live.lock().iter().cloned().collect()
    }

    /// Total fibers started.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }

    /// Total fibers ended.
    #[must_use]
    pub fn ended(&self) -> u64 {
        self.ended.load(Ordering::Acquire)
    }

    /// Fibers that ended with a failure, defect or interruption.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    /// Total suspensions observed.
    #[must_use]
    pub fn suspensions(&self) -> u64 {
        self.suspensions.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TrackingSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSupervisor")
            .field("live", &self.live.lock().len())
            .field("started", &self.started())
            .field("ended", &self.ended())
            .finish()
    }
}

impl Supervisor for TrackingSupervisor {
    fn on_start(&self, _: &FiberRefs, _: &AnyEffect, _: Option<&FiberId>, fiber: &FiberId) {
        self.started.fetch_add(1, Ordering::AcqRel);
        self.live.lock().insert(fiber.clone());
    }

    fn on_end(&self, exit: &ErasedExit, fiber: &FiberId) {
        self.ended.fetch_add(1, Ordering::AcqRel);
        if exit.is_failure() {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
        self.live.lock().remove(fiber);
    }

    fn on_suspend(&self, _fiber: &FiberId) {
        self.suspensions.fetch_add(1, Ordering::AcqRel);
    }
}

/// Forwards every event to each supervisor in order.
#[derive(Clone, Default)]
pub struct CompositeSupervisor {
    supervisors: Vec<Arc<dyn Supervisor>>,
}

impl CompositeSupervisor {
    /// Creates an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a supervisor after the existing ones.
    #[must_use]
    pub fn with(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisors.push(supervisor);
        self
    }

    /// Number of supervisors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    /// Returns `true` if there are no supervisors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }
}

impl fmt::Debug for CompositeSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSupervisor")
            .field("len", &self.supervisors.len())
            .finish()
    }
}

impl Supervisor for CompositeSupervisor {
    fn on_start(
        &self,
        parent_refs: &FiberRefs,
        effect: &AnyEffect,
        parent: Option<&FiberId>,
        fiber: &FiberId,
    ) {
        for s in &self.supervisors {
            s.on_start(parent_refs, effect, parent, fiber);
        }
    }

    fn on_end(&self, exit: &ErasedExit, fiber: &FiberId) {
        for s in &self.supervisors {
            s.on_end(exit, fiber);
        }
    }

    fn on_suspend(&self, fiber: &FiberId) {
        for s in &self.supervisors {
            s.on_suspend(fiber);
        }
    }

    fn on_resume(&self, fiber: &FiberId) {
        for s in &self.supervisors {
            s.on_resume(fiber);
        }
    }
}
