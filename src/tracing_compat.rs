//! Tracing compatibility layer for structured logging.
//!
//! Runtime internals log through this module only, so the crate works
//! whether or not the `tracing-integration` feature is enabled:
//!
//! - **With feature enabled**: re-exports from the `tracing` crate.
//! - **Without feature**: no-op macros that compile to nothing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fibril::tracing_compat::{debug, trace};
//!
//! trace!(fiber = %id, "fiber started");
//! debug!(restarts = n, "transaction restarted");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, event, info, trace, warn, Level};

// When tracing is disabled, provide no-op macros
#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    /// No-op event macro.
    #[macro_export]
    macro_rules! event {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, event, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
