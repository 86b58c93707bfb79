//! Atomically updated shared values.

use crate::effect::{Data, Effect};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A shared mutable value whose updates are atomic.
///
/// Unlike a [`TRef`](crate::stm::TRef), a `Ref` cannot take part in a
/// transaction spanning several cells, but updates never restart.
pub struct Ref<A> {
    value: Arc<Mutex<A>>,
}

impl<A> Clone for Ref<A> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for Ref<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&*self.value.lock()).finish()
    }
}

impl<A: Data> Ref<A> {
    /// Creates a ref outside any fiber.
    #[must_use]
    pub fn new(value: A) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
        }
    }

    /// Creates a ref.
    #[must_use]
    pub fn make<E: Data>(value: A) -> Effect<Self, E> {
        Effect::sync(move || Self::new(value.clone()))
    }

    /// The current value, read outside any fiber.
    #[must_use]
    pub fn peek(&self) -> A {
        self.value.lock().clone()
    }

    /// The current value.
    #[must_use]
    pub fn get<E: Data>(&self) -> Effect<A, E> {
        let value = Arc::clone(&self.value);
        Effect::sync(move || value.lock().clone())
    }

    /// Replaces the value.
    #[must_use]
    pub fn set<E: Data>(&self, next: A) -> Effect<(), E> {
        self.modify(move |_| ((), next.clone()))
    }

    /// Applies `f` to the value.
    #[must_use]
    pub fn update<E: Data>(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> Effect<(), E> {
        self.modify(move |a| ((), f(a)))
    }

    /// Computes a result and a new value from the current one, atomically.
    #[must_use]
    pub fn modify<B: Data, E: Data>(
        &self,
        f: impl Fn(A) -> (B, A) + Send + Sync + 'static,
    ) -> Effect<B, E> {
        let value = Arc::clone(&self.value);
        Effect::sync(move || {
            let mut guard = value.lock();
            let (out, next) = f(guard.clone());
            *guard = next;
            out
        })
    }

    /// Replaces the value, returning the previous one.
    #[must_use]
    pub fn get_and_set<E: Data>(&self, next: A) -> Effect<A, E> {
        self.modify(move |old| (old, next.clone()))
    }

    /// Applies `f`, returning the previous value.
    #[must_use]
    pub fn get_and_update<E: Data>(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> Effect<A, E> {
        self.modify(move |old| {
            let next = f(old.clone());
            (old, next)
        })
    }

    /// Applies `f`, returning the new value.
    #[must_use]
    pub fn update_and_get<E: Data>(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> Effect<A, E> {
        self.modify(move |old| {
            let next = f(old);
            (next.clone(), next)
        })
    }
}
