//! Core data types shared by every subsystem.
//!
//! - [`id`]: fiber identifiers and their ordering
//! - [`cause`]: the failure tree (`Cause`, `Defect`)
//! - [`exit`]: terminal outcome of a fiber
//! - [`builder`]: configuration errors

pub mod builder;
pub mod cause;
pub mod exit;
pub mod id;

pub use builder::{BuildError, BuildResult};
pub use cause::{Cause, CauseLeaf, Defect};
pub use exit::Exit;
pub use id::FiberId;
