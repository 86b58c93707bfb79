//! Multi-worker fiber scheduler.
//!
//! Runnable fibers go into one global MPMC queue. A fixed pool of worker
//! threads pops fibers and drives each until it suspends, yields or
//! finishes; idle workers park on a condition variable. A fiber is queued
//! at most once at a time, guarded by its own `running` flag.

pub(crate) mod global_queue;
pub(crate) mod worker;

pub(crate) use worker::current_worker;

use crate::error::{Error, ErrorKind};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::fiber::Fiber;
use crate::tracing_compat::debug;
use global_queue::GlobalQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use worker::{Parker, Worker};

/// Global queue plus worker pool.
pub(crate) struct Scheduler {
    global: Arc<GlobalQueue>,
    parker: Arc<Parker>,
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns `config.worker_threads` workers.
    pub(crate) fn start(config: &RuntimeConfig) -> Result<Self, Error> {
        let scheduler = Self {
            global: Arc::new(GlobalQueue::new()),
            parker: Arc::new(Parker::new(config.worker_threads)),
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::with_capacity(config.worker_threads)),
        };
        for id in 0..config.worker_threads {
            let worker = Worker {
                id,
                global: Arc::clone(&scheduler.global),
                parker: Arc::clone(&scheduler.parker),
                shutdown: Arc::clone(&scheduler.shutdown),
            };
            let mut builder = thread::Builder::new().name(format!("{}-{id}", config.thread_name_prefix));
            if config.thread_stack_size > 0 {
                builder = builder.stack_size(config.thread_stack_size);
            }
            match builder.spawn(move || worker.run_loop()) {
                Ok(handle) => scheduler.handles.lock().push(handle),
                Err(e) => {
                    scheduler.stop();
                    return Err(Error::new(ErrorKind::ThreadSpawn)
                        .with_message(format!("failed to spawn worker {id}"))
                        .with_source(e));
                }
            }
        }
        debug!(workers = config.worker_threads, "scheduler started");
        Ok(scheduler)
    }

    pub(crate) fn submit(&self, fiber: Arc<Fiber>) {
        self.global.push(fiber);
        self.parker.unpark();
    }

    pub(crate) fn queued(&self) -> usize {
        self.global.len()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stops the workers and joins them, except the calling thread if it is
    /// one of them. Queued fibers are dropped.
    pub(crate) fn stop(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.parker.unpark_all();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
        let dropped = self.global.clear();
        debug!(dropped, "scheduler stopped");
    }
}
