//! Runtime builder and the runtime itself.

use crate::effect::{Data, Effect};
use crate::error::{Error, ErrorKind};
use crate::fiber_ref::{FiberRef, FiberRefBuilder, FiberRefRegistry};
use crate::runtime::config::{ClockKind, RuntimeConfig};
use crate::runtime::env_config;
use crate::runtime::fiber::RawFiber;
use crate::runtime::handle::FiberHandle;
use crate::runtime::scheduler::{current_worker, Scheduler};
use crate::runtime::state::{FiberDump, RuntimeInner};
use crate::runtime::supervisor::Supervisor;
use crate::time::{LiveClock, TestClock};
use crate::tracing_compat::{debug, info, warn};
use crate::types::{BuildError, Cause, Exit};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing a runtime with custom configuration.
#[derive(Clone, Debug)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the number of op-codes a fiber runs before yielding its worker.
    #[must_use]
    pub fn yield_budget(mut self, budget: usize) -> Self {
        self.config.yield_budget = budget;
        self
    }

    /// Choose the clock fibers observe.
    #[must_use]
    pub fn clock(mut self, kind: ClockKind) -> Self {
        self.config.clock = kind;
        self
    }

    /// Set how long the test clock waits before warning that time is not
    /// being advanced.
    #[must_use]
    pub fn test_clock_warning_delay(mut self, delay: Duration) -> Self {
        self.config.test_clock_warning_delay = delay;
        self
    }

    /// Set how long [`Runtime::shutdown`] waits for fibers to finish.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Install a lifecycle observer.
    #[must_use]
    pub fn supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.config.supervisor = supervisor;
        self
    }

    /// Apply `FIBRIL_*` environment variables on top of the current
    /// settings.
    pub fn with_env_overrides(mut self) -> Result<Self, BuildError> {
        env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Defaults overridden by `FIBRIL_*` environment variables.
    pub fn from_env() -> Result<Self, BuildError> {
        Self::new().with_env_overrides()
    }

    /// Defaults overridden by a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self, BuildError> {
        let parsed = env_config::parse_toml_str(toml)?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &parsed);
        Ok(builder)
    }

    /// Defaults overridden by a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self, BuildError> {
        let parsed = env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &parsed);
        Ok(builder)
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime, Error> {
        Runtime::with_config(self.config)
    }

    /// Single worker thread.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// One worker per available core.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }

    /// Two workers on virtual time, for tests that drive a
    /// [`TestClock`].
    #[must_use]
    pub fn test() -> Self {
        Self::new().worker_threads(2).clock(ClockKind::Test)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A fiber runtime: worker threads, a clock and the fibers running on them.
///
/// Dropping the runtime shuts it down.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", self.inner.config())
            .field("live_fibers", &self.inner.live_fibers())
            .finish()
    }
}

impl Runtime {
    /// Construct a runtime from the given configuration.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, Error> {
        config.normalize();
        let live_clock = LiveClock::start(&config.thread_name_prefix)?;
        let test_clock = match config.clock {
            ClockKind::Live => None,
            ClockKind::Test => Some(TestClock::new(
                Arc::clone(&live_clock),
                config.test_clock_warning_delay,
            )),
        };
        let scheduler = Scheduler::start(&config)?;
        info!(
            workers = config.worker_threads,
            clock = ?config.clock,
            "runtime started"
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner::new(config, scheduler, live_clock, test_clock)),
        })
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        self.inner.config()
    }

    /// Starts `effect` on a new root fiber.
    pub fn fork<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Result<FiberHandle<A, E>, Error> {
        let fiber = self.inner.spawn_root(effect.into_op())?;
        Ok(FiberHandle::from_raw(RawFiber(fiber)))
    }

    /// Runs `effect` on a new root fiber and blocks the calling thread until
    /// it is done.
    ///
    /// Must not be called from a fiber; doing so returns a defect instead
    /// of blocking a worker.
    pub fn run_sync_exit<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Exit<A, E> {
        if current_worker().is_some() {
            return Exit::Failure(Cause::die(
                "Runtime::run_sync called from a runtime worker thread",
            ));
        }
        match self.fork(effect) {
            Ok(handle) => handle.wait(),
            Err(e) => Exit::Failure(Cause::die(e.to_string())),
        }
    }

    /// Like [`Runtime::run_sync_exit`], as a `Result`.
    pub fn run_sync<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Result<A, Cause<E>> {
        self.run_sync_exit(effect).into_result()
    }

    /// Creates a fiber ref owned by this runtime.
    #[must_use]
    pub fn fiber_ref<A>(&self, builder: FiberRefBuilder<A>) -> FiberRef<A>
    where
        A: Data + PartialEq,
    {
        builder.build(self.inner.fiber_refs())
    }

    /// The registry holding this runtime's fiber refs.
    #[must_use]
    pub fn fiber_refs(&self) -> &FiberRefRegistry {
        self.inner.fiber_refs()
    }

    /// The virtual clock, for runtimes built with [`ClockKind::Test`].
    #[must_use]
    pub fn test_clock(&self) -> Option<Arc<TestClock>> {
        self.inner.test_clock()
    }

    /// Blocks until every fiber is suspended and stays so across two
    /// consecutive snapshots.
    pub fn await_suspended(&self) -> Result<(), Error> {
        let clock = self.test_clock().ok_or_else(|| {
            Error::new(ErrorKind::InvalidConfig)
                .with_message("await_suspended needs a runtime built with the test clock")
        })?;
        let waiter: Effect<()> = clock.await_suspended();
        self.run_sync(waiter).map_err(|cause| {
            Error::new(ErrorKind::Internal).with_message(cause.pretty())
        })
    }

    /// Number of fibers that have not finished.
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.inner.live_fibers()
    }

    /// Fibers waiting in the run queue.
    #[must_use]
    pub fn queued_fibers(&self) -> usize {
        self.inner.scheduler().queued()
    }

    /// Snapshot of every live fiber, in id order.
    #[must_use]
    pub fn fiber_dump(&self) -> Vec<FiberDump> {
        self.inner.dump()
    }

    /// [`Runtime::fiber_dump`] as pretty-printed JSON.
    pub fn fiber_dump_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(&self.fiber_dump()).map_err(|e| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to serialize fiber dump")
                .with_source(e)
        })
    }

    /// Interrupts every root fiber and waits up to the configured timeout
    /// for them and their children to finish, then stops the workers and
    /// drops pending timers. Later calls do nothing.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.inner.shutdown()
    }

    /// Returns `true` once [`Runtime::shutdown`] has stopped the workers.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.scheduler().is_stopped()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.inner.shutdown() {
            warn!(error = %e, "runtime dropped with fibers still running");
        }
        debug!("runtime dropped");
    }
}

/// Runs `effect` on a fresh runtime built from `builder` and shuts it down.
pub fn run_with<A: Data, E: Data>(builder: RuntimeBuilder, effect: Effect<A, E>) -> Result<Exit<A, E>, Error> {
    let runtime = builder.build()?;
    let exit = runtime.run_sync_exit(effect);
    runtime.shutdown()?;
    Ok(exit)
}
