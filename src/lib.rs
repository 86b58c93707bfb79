//! Fibril: a fiber runtime with structured interruption, software
//! transactional memory and a schedule algebra.
//!
//! # Overview
//!
//! Programs are built as [`Effect`] values: inert descriptions that a
//! [`Runtime`] interprets on lightweight fibers. Fibers are multiplexed over
//! a small pool of worker threads and never block them: waiting for time,
//! for another fiber or for a transaction to become possible suspends the
//! fiber and hands the thread back.
//!
//! # Core Guarantees
//!
//! - **Structured concurrency**: a fiber finishes only after its supervised
//!   children have been interrupted and awaited
//! - **Interruption is cooperative**: finalizers always run, and
//!   uninterruptible regions are honoured
//! - **Nothing is lost**: concurrent failures are kept side by side in a
//!   [`Cause`] tree
//! - **Composable transactions**: [`stm`] commits are atomic, and `retry`
//!   suspends until a read ref changes
//! - **Deterministic time**: a [`TestClock`](time::TestClock) moves only
//!   when a test advances it
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, `Cause`, `Exit`, configuration errors
//! - [`effect`]: the effect description and its combinators
//! - [`runtime`]: fibers, scheduler, supervisor, runtime builder
//! - [`fiber_ref`]: fiber-local state with fork/join semantics
//! - [`combinator`]: parallel composition, races, timeouts, retries
//! - [`stm`]: transactional refs and collections
//! - [`sync`]: deferred values, refs, semaphores, queues
//! - [`schedule`]: intervals and recurrence schedules
//! - [`time`]: live and virtual clocks
//! - [`error`]: runtime errors
//! - [`util`]: deterministic RNG

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod combinator;
pub mod effect;
pub mod error;
pub mod fiber_ref;
pub mod runtime;
pub mod schedule;
pub mod stm;
pub mod sync;
#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;
pub mod time;
pub mod tracing_compat;
pub mod types;
pub mod util;

pub use effect::{AnyEffect, Callback, Data, Effect, LogLevel, Restore};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use fiber_ref::{FiberRef, FiberRefs};
pub use runtime::{run_with, FiberHandle, Runtime, RuntimeBuilder};
pub use schedule::{Schedule, ScheduleExt};
pub use stm::{Stm, TRef};
pub use types::{Cause, Defect, Exit, FiberId};
