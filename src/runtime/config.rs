//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"fibril-worker"` |
//! | `yield_budget` | 2048 op-codes |
//! | `clock` | [`ClockKind::Live`] |
//! | `test_clock_warning_delay` | 5 s |
//! | `shutdown_timeout` | 5 s |
//! | `supervisor` | [`NoopSupervisor`] |

use crate::runtime::supervisor::{NoopSupervisor, Supervisor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default thread name prefix.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "fibril-worker";
/// Default op-codes a fiber runs before yielding its worker.
pub const DEFAULT_YIELD_BUDGET: usize = 2048;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Which clock fibers observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Wall-clock time with a timer thread.
    #[default]
    Live,
    /// Virtual time advanced by [`TestClock`](crate::time::TestClock).
    Test,
}

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Stack size per worker thread (default: 2MB).
    pub thread_stack_size: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Op-codes a fiber may run before yielding its worker.
    pub yield_budget: usize,
    /// Clock observed by `sleep` and schedules.
    pub clock: ClockKind,
    /// Real time after which the test clock warns that nobody advances it.
    pub test_clock_warning_delay: Duration,
    /// How long `shutdown` waits for interrupted fibers to finish.
    pub shutdown_timeout: Duration,
    /// Observer of fiber lifecycle events.
    pub supervisor: Arc<dyn Supervisor>,
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("yield_budget", &self.yield_budget)
            .field("clock", &self.clock)
            .field("test_clock_warning_delay", &self.test_clock_warning_delay)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_STACK_SIZE;
        }
        if self.yield_budget == 0 {
            self.yield_budget = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            yield_budget: DEFAULT_YIELD_BUDGET,
            clock: ClockKind::Live,
            test_clock_warning_delay: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            supervisor: Arc::new(NoopSupervisor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn test_default_config_sane() {
        init_test("test_default_config_sane");
        let config = RuntimeConfig::default();
        crate::assert_with_log!(
            config.worker_threads >= 1,
            "worker_threads",
            true,
            config.worker_threads >= 1
        );
        crate::assert_with_log!(
            config.yield_budget == DEFAULT_YIELD_BUDGET,
            "yield_budget",
            DEFAULT_YIELD_BUDGET,
            config.yield_budget
        );
        crate::assert_with_log!(
            config.clock == ClockKind::Live,
            "clock",
            ClockKind::Live,
            config.clock
        );
        crate::assert_with_log!(
            config.test_clock_warning_delay == Duration::from_secs(5),
            "warning delay",
            Duration::from_secs(5),
            config.test_clock_warning_delay
        );
        crate::test_complete!("test_default_config_sane");
    }

    #[test]
    fn test_normalize_enforces_minimums() {
        init_test("test_normalize_enforces_minimums");
        let mut config = RuntimeConfig {
            worker_threads: 0,
            thread_stack_size: 0,
            thread_name_prefix: String::new(),
            yield_budget: 0,
            ..RuntimeConfig::default()
        };
        config.normalize();
        crate::assert_with_log!(
            config.worker_threads == 1,
            "worker_threads",
            1,
            config.worker_threads
        );
        crate::assert_with_log!(
            config.thread_stack_size == DEFAULT_STACK_SIZE,
            "thread_stack_size",
            DEFAULT_STACK_SIZE,
            config.thread_stack_size
        );
        crate::assert_with_log!(config.yield_budget == 1, "yield_budget", 1, config.yield_budget);
        crate::assert_with_log!(
            config.thread_name_prefix == DEFAULT_THREAD_NAME_PREFIX,
            "thread_name_prefix",
            DEFAULT_THREAD_NAME_PREFIX,
            config.thread_name_prefix
        );
        crate::test_complete!("test_normalize_enforces_minimums");
    }

    #[test]
    fn test_normalize_preserves_custom_values() {
        init_test("test_normalize_preserves_custom_values");
        let mut config = RuntimeConfig {
            worker_threads: 4,
            thread_stack_size: 1024,
            thread_name_prefix: "custom".to_string(),
            yield_budget: 32,
            clock: ClockKind::Test,
            ..RuntimeConfig::default()
        };
        config.normalize();
        crate::assert_with_log!(config.worker_threads == 4, "worker_threads", 4, config.worker_threads);
        crate::assert_with_log!(
            config.thread_stack_size == 1024,
            "thread_stack_size",
            1024,
            config.thread_stack_size
        );
        crate::assert_with_log!(
            config.thread_name_prefix == "custom",
            "thread_name_prefix",
            "custom",
            config.thread_name_prefix
        );
        crate::assert_with_log!(config.yield_budget == 32, "yield_budget", 32, config.yield_budget);
        crate::assert_with_log!(config.clock == ClockKind::Test, "clock", ClockKind::Test, config.clock);
        crate::test_complete!("test_normalize_preserves_custom_values");
    }

    #[test]
    fn clock_kind_serde_names() {
        let json = serde_json::to_string(&ClockKind::Test).expect("serialize");
        assert_eq!(json, "\"test\"");
        let back: ClockKind = serde_json::from_str("\"live\"").expect("deserialize");
        assert_eq!(back, ClockKind::Live);
    }
}
