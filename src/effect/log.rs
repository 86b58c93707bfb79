//! Effect-level logging.
//!
//! Log lines are emitted as `tracing` events tagged with the fiber id and the
//! fiber's log annotations. Annotations live in a fiber ref, so a child
//! forked inside [`Effect::annotate_logs`] logs with the same annotations.

use super::op::{erase, Data, Op};
use super::Effect;
use crate::fiber_ref::LogAnnotations;
use crate::tracing_compat::{debug, error, info, trace, warn};
use crate::types::FiberId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of an effect log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Very fine-grained diagnostics.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected but recoverable.
    Warning,
    /// A failure.
    Error,
    /// Disables logging when used as the minimum level.
    None,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::None => "OFF",
        };
        f.write_str(s)
    }
}

fn render(annotations: &LogAnnotations) -> String {
    annotations
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[allow(unused_variables)]
fn emit(level: LogLevel, fiber: &FiberId, annotations: &LogAnnotations, message: &str) {
    let annotations = render(annotations);
    match level {
        LogLevel::Trace => trace!(fiber = %fiber, annotations = %annotations, "{message}"),
        LogLevel::Debug => debug!(fiber = %fiber, annotations = %annotations, "{message}"),
        LogLevel::Info => info!(fiber = %fiber, annotations = %annotations, "{message}"),
        LogLevel::Warning => warn!(fiber = %fiber, annotations = %annotations, "{message}"),
        LogLevel::Error => error!(fiber = %fiber, annotations = %annotations, "{message}"),
        LogLevel::None => {}
    }
}

impl<E: Data> Effect<(), E> {
    /// Logs `message` at `level` with the fiber's annotations.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::from_op(Op::with_fiber(move |scope| {
            let registry = scope.fiber.runtime().fiber_refs();
            let minimum = registry.log_level().get_from(scope.refs);
            if level != LogLevel::None && level >= minimum {
                let annotations = registry.log_annotations().get_from(scope.refs);
                emit(level, scope.fiber.id(), &annotations, &message);
            }
            Op::unit()
        }))
    }

    /// Logs at trace level.
    pub fn log_trace(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Trace, message)
    }

    /// Logs at debug level.
    pub fn log_debug(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Debug, message)
    }

    /// Logs at info level.
    pub fn log_info(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Info, message)
    }

    /// Logs at warning level.
    pub fn log_warn(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Warning, message)
    }

    /// Logs at error level.
    pub fn log_error(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Error, message)
    }
}

impl<E: Data> Effect<LogAnnotations, E> {
    /// The running fiber's log annotations.
    #[must_use]
    pub fn log_annotations() -> Self {
        Self::from_op(Op::with_fiber(|scope| {
            let registry = scope.fiber.runtime().fiber_refs();
            Op::Succeed(erase(registry.log_annotations().get_from(scope.refs)))
        }))
    }
}

impl<A: Data, E: Data> Effect<A, E> {
    /// Adds `key=value` to every log line emitted while `self` runs,
    /// including lines from fibers it forks.
    #[must_use]
    pub fn annotate_logs(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value): (String, String) = (key.into(), value.into());
        let inner = self;
        Self::from_op(Op::with_fiber(move |scope| {
            let annotations = scope.fiber.runtime().fiber_refs().log_annotations().clone();
            let (key, value) = (key.clone(), value.clone());
            annotations
                .locally_with(
                    move |current| {
                        let mut next = current.clone();
                        next.insert(key.clone(), value.clone());
                        next
                    },
                    inner.clone(),
                )
                .into_op()
        }))
    }

    /// Runs `self` with a minimum level for effect logging.
    #[must_use]
    pub fn with_minimum_log_level(self, level: LogLevel) -> Self {
        let inner = self;
        Self::from_op(Op::with_fiber(move |scope| {
            let min = scope.fiber.runtime().fiber_refs().log_level().clone();
            min.locally(level, inner.clone()).into_op()
        }))
    }

    /// Logs the success value with `render` at `level`, keeping the value.
    #[must_use]
    pub fn tap_log(
        self,
        level: LogLevel,
        render: impl Fn(&A) -> String + Send + Sync + 'static,
    ) -> Self {
        self.tap(move |a| Effect::<(), E>::log(level, render(a)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::None);
        assert_eq!(LogLevel::Warning.to_string(), "WARN");
    }

    #[test]
    fn annotations_render_sorted() {
        let mut a = LogAnnotations::new();
        a.insert("b".into(), "2".into());
        a.insert("a".into(), "1".into());
        assert_eq!(render(&a), "a=1 b=2");
    }
}
