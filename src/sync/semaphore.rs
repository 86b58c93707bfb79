//! Counting semaphore for fibers.

use crate::effect::{Data, Effect};
use crate::stm::TSemaphore;

/// A counting semaphore. Waiting for permits suspends the fiber and can be
/// interrupted without leaking permits.
#[derive(Clone)]
pub struct Semaphore {
    permits: TSemaphore,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").finish_non_exhaustive()
    }
}

impl Semaphore {
    /// A semaphore with `permits` free permits.
    #[must_use]
    pub fn new(permits: u64) -> Self {
        Self {
            permits: TSemaphore::new(permits),
        }
    }

    /// Creates a semaphore.
    #[must_use]
    pub fn make<E: Data>(permits: u64) -> Effect<Self, E> {
        Effect::sync(move || Self::new(permits))
    }

    /// Takes one permit, waiting until one is free.
    #[must_use]
    pub fn acquire<E: Data>(&self) -> Effect<(), E> {
        self.permits.acquire().commit()
    }

    /// Takes `n` permits at once.
    #[must_use]
    pub fn acquire_n<E: Data>(&self, n: u64) -> Effect<(), E> {
        self.permits.acquire_n(n).commit()
    }

    /// Returns one permit.
    #[must_use]
    pub fn release<E: Data>(&self) -> Effect<(), E> {
        self.permits.release().commit()
    }

    /// Returns `n` permits.
    #[must_use]
    pub fn release_n<E: Data>(&self, n: u64) -> Effect<(), E> {
        self.permits.release_n(n).commit()
    }

    /// Free permits.
    #[must_use]
    pub fn available<E: Data>(&self) -> Effect<u64, E> {
        self.permits.available().commit()
    }

    /// Runs `effect` holding one permit.
    #[must_use]
    pub fn with_permit<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        self.permits.with_permits(1, effect)
    }

    /// Runs `effect` holding `n` permits.
    #[must_use]
    pub fn with_permits<A: Data, E: Data>(&self, n: u64, effect: Effect<A, E>) -> Effect<A, E> {
        self.permits.with_permits(n, effect)
    }
}
