//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `FIBRIL_*` env vars
//! 3. **Config file**: values loaded from TOML (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `FIBRIL_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `FIBRIL_YIELD_BUDGET` | `usize` | `yield_budget` |
//! | `FIBRIL_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `FIBRIL_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `FIBRIL_TEST_CLOCK` | `bool` | `clock` (`Test` when true) |
//! | `FIBRIL_SHUTDOWN_TIMEOUT_MS` | `u64` | `shutdown_timeout` |

use crate::runtime::config::{ClockKind, RuntimeConfig};
use crate::types::builder::BuildError;
use std::time::Duration;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "FIBRIL_WORKER_THREADS";
/// Environment variable name for the cooperative yield budget.
pub const ENV_YIELD_BUDGET: &str = "FIBRIL_YIELD_BUDGET";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "FIBRIL_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "FIBRIL_THREAD_NAME_PREFIX";
/// Environment variable name selecting the virtual test clock.
pub const ENV_TEST_CLOCK: &str = "FIBRIL_TEST_CLOCK";
/// Environment variable name for the shutdown wait, in milliseconds.
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "FIBRIL_SHUTDOWN_TIMEOUT_MS";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), BuildError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_YIELD_BUDGET) {
        config.yield_budget = parse_usize(ENV_YIELD_BUDGET, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_TEST_CLOCK) {
        config.clock = if parse_bool(ENV_TEST_CLOCK, &val)? {
            ClockKind::Test
        } else {
            ClockKind::Live
        };
    }
    if let Some(val) = read_env(ENV_SHUTDOWN_TIMEOUT_MS) {
        config.shutdown_timeout = Duration::from_millis(parse_u64(ENV_SHUTDOWN_TIMEOUT_MS, &val)?);
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, BuildError> {
    val.trim().parse::<usize>().map_err(|e| {
        BuildError::custom(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, BuildError> {
    val.trim().parse::<u64>().map_err(|e| {
        BuildError::custom(format!(
            "invalid value for {var_name}: expected u64, got {val:?} ({e})"
        ))
    })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, BuildError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(BuildError::custom(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [scheduler]
/// worker_threads = 4
/// yield_budget = 1024
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp-worker"
///
/// [clock]
/// kind = "test"
/// warning_delay_ms = 5000
///
/// [shutdown]
/// timeout_ms = 2000
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Clock settings.
    #[serde(default)]
    pub clock: ClockToml,
    /// Shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Op-codes a fiber runs before yielding.
    pub yield_budget: Option<usize>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
}

/// Clock section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ClockToml {
    /// `"live"` or `"test"`.
    pub kind: Option<ClockKind>,
    /// Real-time delay before the test clock warns, in milliseconds.
    pub warning_delay_ms: Option<u64>,
}

/// Shutdown section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ShutdownToml {
    /// How long shutdown waits for fibers, in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.scheduler.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = toml.scheduler.yield_budget {
        config.yield_budget = v;
    }
    if let Some(v) = toml.scheduler.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.scheduler.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.clock.kind {
        config.clock = v;
    }
    if let Some(v) = toml.clock.warning_delay_ms {
        config.test_clock_warning_delay = Duration::from_millis(v);
    }
    if let Some(v) = toml.shutdown.timeout_ms {
        config.shutdown_timeout = Duration::from_millis(v);
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, BuildError> {
    toml::from_str(toml_str)
        .map_err(|e| BuildError::custom(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, BuildError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BuildError::custom(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        f()
    }

    fn with_env<F, R>(var: &str, val: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            std::env::set_var(var, val);
            let result = f();
            std::env::remove_var(var);
            result
        })
    }

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
            let result = f();
            for (k, _) in vars {
                std::env::remove_var(k);
            }
            result
        })
    }

    fn clean_env_locked() {
        for var in &[
            ENV_WORKER_THREADS,
            ENV_YIELD_BUDGET,
            ENV_THREAD_STACK_SIZE,
            ENV_THREAD_NAME_PREFIX,
            ENV_TEST_CLOCK,
            ENV_SHUTDOWN_TIMEOUT_MS,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parse_usize_valid() {
        assert_eq!(super::parse_usize("TEST", "42").unwrap(), 42);
        assert_eq!(super::parse_usize("TEST", " 100 ").unwrap(), 100);
    }

    #[test]
    fn parse_usize_invalid() {
        let err = super::parse_usize("TEST", "-1").unwrap_err();
        assert!(err.to_string().contains("TEST"));
        assert!(super::parse_usize("TEST", "abc").is_err());
    }

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "on"] {
            assert!(super::parse_bool("TEST", v).unwrap(), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert!(!super::parse_bool("TEST", v).unwrap(), "{v}");
        }
        assert!(super::parse_bool("TEST", "maybe").is_err());
    }

    #[test]
    fn env_overrides_worker_threads() {
        with_env(ENV_WORKER_THREADS, "8", || {
            let mut config = RuntimeConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.worker_threads, 8);
        });
    }

    #[test]
    fn env_overrides_yield_budget_and_clock() {
        with_envs(&[(ENV_YIELD_BUDGET, "64"), (ENV_TEST_CLOCK, "true")], || {
            let mut config = RuntimeConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.yield_budget, 64);
            assert_eq!(config.clock, ClockKind::Test);
        });
    }

    #[test]
    fn env_overrides_thread_settings() {
        with_envs(
            &[
                (ENV_THREAD_NAME_PREFIX, "myapp-worker"),
                (ENV_THREAD_STACK_SIZE, "4194304"),
                (ENV_SHUTDOWN_TIMEOUT_MS, "250"),
            ],
            || {
                let mut config = RuntimeConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert_eq!(config.thread_name_prefix, "myapp-worker");
                assert_eq!(config.thread_stack_size, 4_194_304);
                assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
            },
        );
    }

    #[test]
    fn env_overrides_unset_vars_leave_defaults() {
        with_clean_env(|| {
            let defaults = RuntimeConfig::default();
            let mut config = RuntimeConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.worker_threads, defaults.worker_threads);
            assert_eq!(config.yield_budget, defaults.yield_budget);
            assert_eq!(config.clock, defaults.clock);
        });
    }

    #[test]
    fn env_overrides_invalid_value_returns_error() {
        with_env(ENV_WORKER_THREADS, "not_a_number", || {
            let mut config = RuntimeConfig::default();
            let err = apply_env_overrides(&mut config).unwrap_err();
            assert!(err.to_string().contains(ENV_WORKER_THREADS));
        });
    }

    #[test]
    fn env_overrides_invalid_bool_returns_error() {
        with_env(ENV_TEST_CLOCK, "maybe", || {
            let mut config = RuntimeConfig::default();
            assert!(apply_env_overrides(&mut config).is_err());
        });
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn parse_toml_full_config() {
        let toml = parse_toml_str(
            r#"
            [scheduler]
            worker_threads = 3
            yield_budget = 99
            thread_name_prefix = "toml-worker"

            [clock]
            kind = "test"
            warning_delay_ms = 10

            [shutdown]
            timeout_ms = 42
            "#,
        )
        .unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &toml);
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.yield_budget, 99);
        assert_eq!(config.thread_name_prefix, "toml-worker");
        assert_eq!(config.clock, ClockKind::Test);
        assert_eq!(config.test_clock_warning_delay, Duration::from_millis(10));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(42));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn parse_toml_empty_and_invalid() {
        let toml = parse_toml_str("").unwrap();
        assert!(toml.scheduler.worker_threads.is_none());
        assert!(parse_toml_str("[scheduler\nworker_threads = 1").is_err());
        assert!(parse_toml_str("[scheduler]\nworker_threads = \"many\"").is_err());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_file_roundtrip() {
        use std::io::Write as _;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\nworker_threads = 2").unwrap();
        let toml = parse_toml_file(file.path()).unwrap();
        assert_eq!(toml.scheduler.worker_threads, Some(2));
        assert!(parse_toml_file(std::path::Path::new("/nonexistent/fibril.toml")).is_err());
    }
}
