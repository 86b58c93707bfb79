//! Combinators for structured concurrency.
//!
//! - [`par`]: run effects on child fibers and wait for all
//!   ([`zip_par`], [`collect_all_par`], [`for_each_par`])
//! - [`race`](mod@race): first to finish wins ([`race()`], [`race_all`])
//! - [`timeout`](mod@timeout): time limits on the runtime clock
//! - [`retry`]: retrying and repeating under a
//!   [`Schedule`](crate::schedule::Schedule)
//!
//! Every branch runs on a supervised child fiber. Whatever the outcome,
//! no child is still running when a combinator completes.

pub mod par;
pub mod race;
pub mod retry;
pub mod timeout;

pub use par::{collect_all_par, for_each_par, zip_par};
pub use race::{race, race_all};
pub use timeout::{timeout, timeout_fail};
