//! Transactional semaphores.

use super::stm::{Stm, TExit};
use super::tref::TRef;
use crate::effect::{Data, Effect};
use std::convert::Infallible;

/// A counting semaphore whose `acquire` retries until enough permits are
/// free.
#[derive(Clone)]
pub struct TSemaphore {
    permits: TRef<u64>,
}

impl TSemaphore {
    /// A semaphore with `permits` free permits.
    #[must_use]
    pub fn new(permits: u64) -> Self {
        Self {
            permits: TRef::new(permits),
        }
    }

    /// Creates a semaphore as part of a transaction.
    #[must_use]
    pub fn make<E: Data>(permits: u64) -> Stm<Self, E> {
        Stm::new(move |_| TExit::Succeed(Self::new(permits)))
    }

    /// Free permits.
    #[must_use]
    pub fn available<E: Data>(&self) -> Stm<u64, E> {
        self.permits.get()
    }

    /// Takes one permit.
    #[must_use]
    pub fn acquire<E: Data>(&self) -> Stm<(), E> {
        self.acquire_n(1)
    }

    /// Takes `n` permits at once, retrying until that many are free.
    #[must_use]
    pub fn acquire_n<E: Data>(&self, n: u64) -> Stm<(), E> {
        let permits = self.permits.clone();
        Stm::new(move |journal| {
            let free = journal.read(&permits);
            if free < n {
                return TExit::Retry;
            }
            journal.write(&permits, free - n);
            TExit::Succeed(())
        })
    }

    /// Takes one permit if one is free.
    #[must_use]
    pub fn try_acquire<E: Data>(&self) -> Stm<bool, E> {
        self.permits.modify(|free| match free.checked_sub(1) {
            Some(left) => (true, left),
            None => (false, free),
        })
    }

    /// Returns one permit.
    #[must_use]
    pub fn release<E: Data>(&self) -> Stm<(), E> {
        self.release_n(1)
    }

    /// Returns `n` permits.
    #[must_use]
    pub fn release_n<E: Data>(&self, n: u64) -> Stm<(), E> {
        self.permits.update(move |free| free.saturating_add(n))
    }

    /// Runs `effect` holding `n` permits, returning them whatever the
    /// outcome. Waiting for permits can be interrupted.
    #[must_use]
    pub fn with_permits<A: Data, E: Data>(&self, n: u64, effect: Effect<A, E>) -> Effect<A, E> {
        let acquire: Effect<(), E> = self.acquire_n(n).commit();
        let release: Effect<(), Infallible> = self.release_n(n).commit();
        Effect::uninterruptible_mask(move |restore| {
            restore
                .apply(acquire.clone())
                .and_then(restore.apply(effect.clone()).ensuring(release.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stm::journal::Journal;

    #[test]
    fn acquire_retries_when_short() {
        let sem = TSemaphore::new(2);
        let mut journal = Journal::new();
        let take_two: Stm<()> = sem.acquire_n(2);
        assert!(matches!(take_two.run(&mut journal), TExit::Succeed(())));
        let one_more: Stm<()> = sem.acquire();
        assert!(matches!(one_more.run(&mut journal), TExit::Retry));
        let try_one: Stm<bool> = sem.try_acquire();
        assert!(matches!(try_one.run(&mut journal), TExit::Succeed(false)));
        let give_back: Stm<()> = sem.release();
        assert!(matches!(give_back.run(&mut journal), TExit::Succeed(())));
        let left: Stm<u64> = sem.available();
        assert!(matches!(left.run(&mut journal), TExit::Succeed(1)));
    }
}
