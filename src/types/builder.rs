//! Errors produced while assembling a runtime from builders, environment
//! variables or configuration files.
//!
//! Builders validate eagerly: every setter that can be wrong is checked when
//! `build()` runs, and the first violation is reported as a [`BuildError`].
//!
//! ```ignore
//! let err = RuntimeBuilder::new().worker_threads(0).build().unwrap_err();
//! assert!(err.to_string().contains("worker_threads"));
//! ```

use thiserror::Error;

/// A configuration value was missing, malformed or inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A required field was not set.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: &'static str,
    },

    /// A field value failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// The field that failed validation.
        field: &'static str,
        /// Why the value is invalid.
        reason: String,
    },

    /// Two options that cannot both be enabled were set.
    #[error("conflicting options: {option_a} and {option_b}")]
    ConflictingOptions {
        /// The first conflicting option.
        option_a: &'static str,
        /// The second conflicting option.
        option_b: &'static str,
    },

    /// Anything else, e.g. an unparsable environment variable.
    #[error("{message}")]
    Custom {
        /// Human readable description.
        message: String,
    },
}

impl BuildError {
    /// Creates a `MissingRequired` error.
    #[must_use]
    pub const fn missing_required(field: &'static str) -> Self {
        Self::MissingRequired { field }
    }

    /// Creates an `InvalidValue` error.
    #[must_use]
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Creates a `ConflictingOptions` error.
    #[must_use]
    pub const fn conflicting(option_a: &'static str, option_b: &'static str) -> Self {
        Self::ConflictingOptions { option_a, option_b }
    }

    /// Creates a `Custom` error.
    #[must_use]
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    /// The field this error is about, if it names one.
    #[must_use]
    pub const fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingRequired { field } | Self::InvalidValue { field, .. } => Some(field),
            Self::ConflictingOptions { option_a, .. } => Some(option_a),
            Self::Custom { .. } => None,
        }
    }
}

/// Result type for builder operations.
pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            BuildError::missing_required("clock").to_string(),
            "missing required configuration: clock"
        );
        assert_eq!(
            BuildError::invalid_value("worker_threads", "must be >= 1").to_string(),
            "invalid worker_threads: must be >= 1"
        );
        assert_eq!(
            BuildError::conflicting("test_clock", "live_clock").to_string(),
            "conflicting options: test_clock and live_clock"
        );
        assert_eq!(BuildError::custom("boom").to_string(), "boom");
    }

    #[test]
    fn field_introspection() {
        assert_eq!(
            BuildError::invalid_value("yield_budget", "zero").field(),
            Some("yield_budget")
        );
        assert_eq!(BuildError::custom("x").field(), None);
    }
}
