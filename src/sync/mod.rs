//! Synchronization primitives for fibers.
//!
//! - [`Deferred`]: a value set once and awaited by many fibers
//! - [`Ref`]: a shared value with atomic updates
//! - [`Semaphore`]: counting semaphore on a [`TSemaphore`](crate::stm::TSemaphore)
//! - [`Queue`]: bounded FIFO on a [`TQueue`](crate::stm::TQueue)
//!
//! # Cancel Safety
//!
//! Every wait suspends the fiber instead of blocking a worker, and every
//! wait can be interrupted. An interrupted wait leaves the primitive as if
//! the waiter had never arrived.

mod deferred;
mod queue;
mod reference;
mod semaphore;

pub use deferred::Deferred;
pub use queue::Queue;
pub use reference::Ref;
pub use semaphore::Semaphore;
