//! Worker thread logic.

use super::global_queue::GlobalQueue;
use crate::tracing_compat::trace;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identifier for a scheduler worker.
pub(crate) type WorkerId = usize;

/// Upper bound on a single park, so a lost wakeup costs at most this much.
const PARK_TIMEOUT: Duration = Duration::from_millis(10);

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// The worker id of the calling thread, if it is a runtime worker.
pub(crate) fn current_worker() -> Option<WorkerId> {
    CURRENT_WORKER.with(Cell::get)
}

/// A worker thread that runs fibers from the global queue.
pub(crate) struct Worker {
    pub(crate) id: WorkerId,
    pub(crate) global: Arc<GlobalQueue>,
    pub(crate) parker: Arc<Parker>,
    pub(crate) shutdown: Arc<AtomicBool>,
}

impl Worker {
    /// Runs the worker scheduling loop until shutdown.
    pub(crate) fn run_loop(&self) {
        CURRENT_WORKER.with(|w| w.set(Some(self.id)));
        trace!(worker_id = self.id, "worker started");
        while !self.shutdown.load(Ordering::Acquire) {
            if let Some(fiber) = self.global.pop() {
                fiber.run();
                continue;
            }
            self.parker.park_timeout(PARK_TIMEOUT);
        }
        CURRENT_WORKER.with(|w| w.set(None));
        trace!(worker_id = self.id, "worker stopped");
    }
}

/// Parks idle workers and wakes them when work arrives.
///
/// Wakeups are counted so an unpark that races ahead of the park is not
/// lost; the count is capped at the number of workers.
pub(crate) struct Parker {
    tokens: Mutex<usize>,
    cvar: Condvar,
    cap: usize,
}

impl Parker {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            tokens: Mutex::new(0),
            cvar: Condvar::new(),
            cap: cap.max(1),
        }
    }

    /// Parks the current thread until notified or `timeout` elapses.
    pub(crate) fn park_timeout(&self, timeout: Duration) {
        let mut tokens = self.tokens.lock();
        if *tokens == 0 {
            let _ = self.cvar.wait_for(&mut tokens, timeout);
        }
        *tokens = tokens.saturating_sub(1);
    }

    /// Wakes one parked worker.
    pub(crate) fn unpark(&self) {
        {
            let mut tokens = self.tokens.lock();
            *tokens = (*tokens + 1).min(self.cap);
        }
        self.cvar.notify_one();
    }

    /// Wakes every parked worker.
    pub(crate) fn unpark_all(&self) {
        {
            let mut tokens = self.tokens.lock();
            *tokens = self.cap;
        }
        self.cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn unpark_before_park_is_not_lost() {
        let parker = Parker::new(2);
        parker.unpark();
        let start = Instant::now();
        parker.park_timeout(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn park_times_out_without_tokens() {
        let parker = Parker::new(1);
        let start = Instant::now();
        parker.park_timeout(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn tokens_are_capped() {
        let parker = Parker::new(1);
        for _ in 0..10 {
            parker.unpark();
        }
        assert_eq!(*parker.tokens.lock(), 1);
    }

    #[test]
    fn not_a_worker_by_default() {
        assert_eq!(current_worker(), None);
    }
}
