//! Shared runtime state.
//!
//! [`RuntimeInner`] is what every fiber points back to: the scheduler, the
//! clock, the supervisor, the fiber-ref registry and the table of live
//! fibers. The table holds the only strong references to fibers that are
//! neither queued nor awaited, so a fiber stays alive until it is done.

use crate::effect::op::Op;
use crate::effect::AnyEffect;
use crate::error::{Error, ErrorKind};
use crate::fiber_ref::{FiberRefRegistry, FiberRefs};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::fiber::{Fiber, FiberStatus};
use crate::runtime::scheduler::Scheduler;
use crate::runtime::supervisor::Supervisor;
use crate::time::{Clock, LiveClock, TestClock};
use crate::tracing_compat::{debug, trace, warn};
use crate::types::FiberId;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often shutdown re-checks the fiber table.
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// One line of [`Runtime::fiber_dump`](super::Runtime::fiber_dump).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FiberDump {
    /// The fiber.
    pub id: FiberId,
    /// Supervising parent, if any.
    pub parent: Option<FiberId>,
    /// Scheduling state.
    pub status: FiberStatus,
    /// Supervised children still alive.
    pub children: Vec<FiberId>,
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    scheduler: Scheduler,
    live_clock: Arc<LiveClock>,
    clock: Arc<dyn Clock>,
    test_clock: Option<Arc<TestClock>>,
    registry: FiberRefRegistry,
    fibers: Mutex<BTreeMap<FiberId, Arc<Fiber>>>,
    fibers_changed: Condvar,
    shutting_down: AtomicBool,
}

impl RuntimeInner {
    pub(crate) fn new(
        config: RuntimeConfig,
        scheduler: Scheduler,
        live_clock: Arc<LiveClock>,
        test_clock: Option<Arc<TestClock>>,
    ) -> Self {
        let clock: Arc<dyn Clock> = match &test_clock {
            Some(test) => Arc::clone(test) as Arc<dyn Clock>,
            None => Arc::clone(&live_clock) as Arc<dyn Clock>,
        };
        Self {
            config,
            scheduler,
            live_clock,
            clock,
            test_clock,
            registry: FiberRefRegistry::new(),
            fibers: Mutex::new(BTreeMap::new()),
            fibers_changed: Condvar::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub(crate) fn test_clock(&self) -> Option<Arc<TestClock>> {
        self.test_clock.clone()
    }

    pub(crate) fn supervisor(&self) -> &dyn Supervisor {
        self.config.supervisor.as_ref()
    }

    pub(crate) fn fiber_refs(&self) -> &FiberRefRegistry {
        &self.registry
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn register(&self, fiber: Arc<Fiber>) {
        self.fibers.lock().insert(fiber.id().clone(), fiber);
    }

    pub(crate) fn unregister(&self, id: &FiberId) {
        let mut fibers = self.fibers.lock();
        fibers.remove(id);
        self.fibers_changed.notify_all();
    }

    pub(crate) fn live_fibers(&self) -> usize {
        self.fibers.lock().len()
    }

    /// Starts a root fiber running `op`.
    pub(crate) fn spawn_root(self: &Arc<Self>, op: Op) -> Result<Arc<Fiber>, Error> {
        if self.is_shutting_down() {
            return Err(Error::new(ErrorKind::RuntimeShutdown)
                .with_message("cannot start a fiber on a runtime that is shutting down"));
        }
        let id = FiberId::new(self.clock.current_time_millis());
        // Roots have no parent to fork from and start at the initial values.
        let refs = FiberRefs::empty();
        self.supervisor()
            .on_start(&refs, &AnyEffect::from_op(op.clone()), None, &id);
        let fiber = Fiber::new(Arc::clone(self), id, None, refs, true, op);
        self.register(Arc::clone(&fiber));
        trace!(fiber = %fiber.id(), "root fiber started");
        fiber.start();
        Ok(fiber)
    }

    /// Statuses of every fiber except `except`, or `None` while any of
    /// them is running or has pending messages.
    pub(crate) fn suspended_snapshot(
        &self,
        except: &FiberId,
    ) -> Option<BTreeMap<FiberId, FiberStatus>> {
        let fibers = self.fibers.lock();
        let mut snapshot = BTreeMap::new();
        for (id, fiber) in fibers.iter() {
            if id == except {
                continue;
            }
            if !fiber.is_quiescent() {
                return None;
            }
            snapshot.insert(id.clone(), fiber.status());
        }
        Some(snapshot)
    }

    pub(crate) fn dump(&self) -> Vec<FiberDump> {
        let fibers: Vec<Arc<Fiber>> = self.fibers.lock().values().cloned().collect();
        fibers
            .iter()
            .map(|fiber| FiberDump {
                id: fiber.id().clone(),
                parent: fiber.parent_id(),
                status: fiber.status(),
                children: fiber.children().iter().map(|c| c.id().clone()).collect(),
            })
            .collect()
    }

    /// Interrupts every root fiber, waits for the fiber table to drain and
    /// stops the workers and timers.
    pub(crate) fn shutdown(&self) -> Result<(), Error> {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(live = self.live_fibers(), "runtime shutting down");
        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut interrupted = BTreeSet::new();
        let mut timed_out = false;
        let mut fibers = self.fibers.lock();
        while !fibers.is_empty() {
            let roots: Vec<Arc<Fiber>> = fibers
                .values()
                .filter(|f| f.parent_id().is_none() && !interrupted.contains(f.id()))
                .cloned()
                .collect();
            if !roots.is_empty() {
                drop(fibers);
                for root in roots {
                    interrupted.insert(root.id().clone());
                    root.interrupt_as(FiberId::None);
                }
                fibers = self.fibers.lock();
                continue;
            }
            let now = Instant::now();
            if now >= deadline {
                timed_out = true;
                break;
            }
            let _ = self
                .fibers_changed
                .wait_for(&mut fibers, SHUTDOWN_POLL.min(deadline - now));
        }
        let abandoned = std::mem::take(&mut *fibers);
        drop(fibers);

        self.scheduler.stop();
        let timers = self.clock.clear_timers();
        self.live_clock.stop();
        debug!(timers, abandoned = abandoned.len(), "runtime stopped");
        drop(abandoned);

        if timed_out {
            warn!(timeout = ?self.config.shutdown_timeout, "fibers still running at shutdown");
            return Err(Error::new(ErrorKind::ShutdownTimeout).with_message(format!(
                "fibers still running after {:?}",
                self.config.shutdown_timeout
            )));
        }
        Ok(())
    }
}
