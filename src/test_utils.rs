//! Test utilities for fibril.
//!
//! This module provides shared helpers for unit tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Runtime constructors for live and virtual time
//! - Exit assertion macros
//!
//! # Example
//! ```ignore
//! use fibril::test_utils::{init_test_logging, test_runtime};
//!
//! init_test_logging();
//! let runtime = test_runtime();
//! let exit = runtime.run_sync_exit(Effect::<u32>::succeed(1));
//! ```

use crate::runtime::{Runtime, RuntimeBuilder};
use std::sync::{Mutex, MutexGuard, Once, PoisonError};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A small live-clock runtime for tests.
#[must_use]
pub fn live_runtime() -> Runtime {
    RuntimeBuilder::multi_thread()
        .worker_threads(2)
        .build()
        .expect("failed to build test runtime")
}

/// A runtime driven by a [`TestClock`](crate::time::TestClock).
#[must_use]
pub fn test_runtime() -> Runtime {
    RuntimeBuilder::test()
        .build()
        .expect("failed to build test runtime")
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an exit is a success with a specific value.
#[macro_export]
macro_rules! assert_exit_success {
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::types::Exit::Success(v) => assert_eq!(v, $expected),
            $crate::types::Exit::Failure(cause) => {
                panic!("expected Exit::Success({:?}), got failure:\n{}", $expected, cause.pretty())
            }
        }
    };
}

/// Assert that an exit failed with exactly the given typed error.
#[macro_export]
macro_rules! assert_exit_fail {
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::types::Exit::Failure(cause) => {
                assert_eq!(cause.first_failure(), Some(&$expected), "{}", cause.pretty())
            }
            $crate::types::Exit::Success(v) => panic!("expected failure, got Exit::Success({:?})", v),
        }
    };
}

/// Assert that an exit is an interruption.
#[macro_export]
macro_rules! assert_exit_interrupted {
    ($exit:expr) => {
        let exit = $exit;
        assert!(exit.is_interrupted(), "expected interruption, got {:?}", exit);
    };
}
