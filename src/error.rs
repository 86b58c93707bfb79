//! Errors raised outside of effects.
//!
//! Inside a running effect every failure travels in a
//! [`Cause`](crate::types::Cause): typed failures, defects and interruptions
//! never leave that channel. The [`Error`] type here covers the host-side
//! surface instead: building a runtime, spawning worker threads, talking to a
//! runtime that has already shut down.
//!
//! # Error Categories
//!
//! - **Configuration**: invalid builder, environment or file settings
//! - **Resource**: the operating system refused a thread or timer
//! - **Lifecycle**: the runtime is shutting down or has stopped
//! - **Internal**: runtime bugs and invalid states

use core::fmt;
use std::sync::Arc;

use crate::types::builder::BuildError;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Configuration ===
    /// A configuration value was rejected.
    InvalidConfig,

    // === Resource ===
    /// A worker or timer thread could not be spawned.
    ThreadSpawn,

    // === Lifecycle ===
    /// The runtime no longer accepts work.
    RuntimeShutdown,
    /// Waiting for fibers to finish took longer than allowed.
    ShutdownTimeout,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,
}

/// Broad classification of an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration failures.
    Configuration,
    /// Operating-system resource failures.
    Resource,
    /// Runtime lifecycle failures.
    Lifecycle,
    /// Internal runtime errors.
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidConfig => ErrorCategory::Configuration,
            Self::ThreadSpawn => ErrorCategory::Resource,
            Self::RuntimeShutdown | Self::ShutdownTimeout => ErrorCategory::Lifecycle,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns true if trying again later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ThreadSpawn | Self::ShutdownTimeout)
    }
}

/// The main error type for runtime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the message, if one was attached.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Shorthand for an internal error.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<BuildError> for Error {
    fn from(err: BuildError) -> Self {
        Self::new(ErrorKind::InvalidConfig)
            .with_message(err.to_string())
            .with_source(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::ThreadSpawn)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// A specialized Result type for runtime operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_message() {
        let err = Error::new(ErrorKind::RuntimeShutdown).with_message("stopped");
        assert_eq!(err.to_string(), "RuntimeShutdown: stopped");
    }

    #[test]
    fn build_error_converts_with_source() {
        let err: Error = BuildError::invalid_value("worker_threads", "must be >= 1").into();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.source().is_some());
        assert_eq!(
            err.message(),
            Some("invalid worker_threads: must be >= 1")
        );
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::ThreadSpawn.is_retryable());
        assert!(!ErrorKind::InvalidConfig.is_retryable());
    }
}
