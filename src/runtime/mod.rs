//! The fiber runtime.
//!
//! - [`config`]: runtime configuration types
//! - [`env_config`]: environment variable and TOML overrides
//! - [`builder`]: the runtime builder and the runtime
//! - [`supervisor`]: lifecycle observers
//! - `fiber`: the run loop interpreting effects
//! - `scheduler`: global run queue and worker pool
//!
//! # Runtime Builder
//!
//! The runtime is configured with a fluent, move-based builder. Each method
//! consumes `self` and returns the updated builder.
//!
//! ```ignore
//! use fibril::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new().worker_threads(4).build()?;
//! let answer = runtime.run_sync(Effect::<u32>::succeed(42))?;
//! ```
//!
//! ## Virtual Time
//!
//! ```ignore
//! let runtime = RuntimeBuilder::test().build()?;
//! let clock = runtime.test_clock().expect("test clock");
//! let sleeper = runtime.fork(Effect::<()>::sleep(Duration::from_secs(60)))?;
//! runtime.run_sync(clock.adjust::<Infallible>(Duration::from_secs(60)))?;
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! // Requires the `config-file` feature.
//! let runtime = RuntimeBuilder::from_toml("config/runtime.toml")?
//!     .with_env_overrides()?
//!     .build()?;
//! ```
//!
//! # Shutdown
//!
//! [`Runtime::shutdown`] (also run on drop) interrupts every root fiber,
//! waits for their finalizers and children up to
//! [`RuntimeConfig::shutdown_timeout`], then stops the workers and drops
//! pending timers.

pub mod builder;
pub mod config;
pub mod env_config;
pub(crate) mod fiber;
mod handle;
pub(crate) mod scheduler;
mod state;
pub mod supervisor;

pub use builder::{run_with, Runtime, RuntimeBuilder};
pub use config::{ClockKind, RuntimeConfig};
pub use fiber::FiberStatus;
pub use handle::FiberHandle;
pub use state::FiberDump;
pub use supervisor::{CompositeSupervisor, NoopSupervisor, Supervisor, TrackingSupervisor};

pub(crate) use state::RuntimeInner;
