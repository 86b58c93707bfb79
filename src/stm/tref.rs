//! Transactional references.

use super::stm::{Stm, TExit};
use crate::effect::op::erase;
use crate::effect::{AnyValue, Data, Effect};
use crate::types::FiberId;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a [`TRef`], stable while any handle to it is alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TRefId(usize);

/// Wakes a fiber suspended in `retry`.
pub(crate) type Todo = Arc<dyn Fn() + Send + Sync>;

struct Versioned<A> {
    value: A,
    version: u64,
}

struct Inner<A> {
    cell: RwLock<Versioned<A>>,
    todos: Mutex<BTreeMap<FiberId, Todo>>,
}

/// Type-erased view of a ref used by journals.
pub(crate) trait ErasedTRef: Send + Sync {
    fn id(&self) -> TRefId;
    fn version(&self) -> u64;
    fn load(&self) -> (AnyValue, u64);
    fn store(&self, value: AnyValue);
    fn add_todo(&self, waiter: FiberId, todo: Todo);
    fn remove_todo(&self, waiter: &FiberId);
    fn take_todos(&self) -> Vec<Todo>;
}

impl<A: Data> ErasedTRef for Inner<A> {
    fn id(&self) -> TRefId {
        TRefId((self as *const Self).cast::<()>() as usize)
    }

    fn version(&self) -> u64 {
        self.cell.read().version
    }

    fn load(&self) -> (AnyValue, u64) {
        let cell = self.cell.read();
        (erase(cell.value.clone()), cell.version)
    }

    fn store(&self, value: AnyValue) {
        if let Some(value) = value.downcast_ref::<A>() {
            let mut cell = self.cell.write();
            cell.value = value.clone();
            cell.version += 1;
        }
    }

    fn add_todo(&self, waiter: FiberId, todo: Todo) {
        self.todos.lock().insert(waiter, todo);
    }

    fn remove_todo(&self, waiter: &FiberId) {
        self.todos.lock().remove(waiter);
    }

    fn take_todos(&self) -> Vec<Todo> {
        std::mem::take(&mut *self.todos.lock()).into_values().collect()
    }
}

/// A mutable cell read and written only inside [`Stm`] transactions.
pub struct TRef<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for TRef<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Data + fmt::Debug> fmt::Debug for TRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.inner.cell.read();
        f.debug_struct("TRef")
            .field("value", &cell.value)
            .field("version", &cell.version)
            .finish()
    }
}

impl<A: Data> TRef<A> {
    /// Creates a ref outside any transaction.
    #[must_use]
    pub fn new(value: A) -> Self {
        Self {
            inner: Arc::new(Inner {
                cell: RwLock::new(Versioned { value, version: 0 }),
                todos: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Creates a ref as part of a transaction.
    #[must_use]
    pub fn make<E: Data>(value: A) -> Stm<Self, E> {
        Stm::new(move |_| TExit::Succeed(Self::new(value.clone())))
    }

    /// Creates a ref in a single-step transaction.
    #[must_use]
    pub fn make_commit<E: Data>(value: A) -> Effect<Self, E> {
        Self::make(value).commit()
    }

    /// Identity of the ref.
    #[must_use]
    pub fn id(&self) -> TRefId {
        self.inner.id()
    }

    pub(crate) fn erased(&self) -> Arc<dyn ErasedTRef> {
        Arc::clone(&self.inner) as Arc<dyn ErasedTRef>
    }

    /// The committed value, read outside any transaction.
    #[must_use]
    pub fn peek(&self) -> A {
        self.inner.cell.read().value.clone()
    }

    /// Fibers currently suspended in a retry that read this ref.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.inner.todos.lock().len()
    }

    /// Reads the value.
    #[must_use]
    pub fn get<E: Data>(&self) -> Stm<A, E> {
        let this = self.clone();
        Stm::new(move |journal| TExit::Succeed(journal.read(&this)))
    }

    /// Writes the value.
    #[must_use]
    pub fn set<E: Data>(&self, value: A) -> Stm<(), E> {
        let this = self.clone();
        Stm::new(move |journal| {
            journal.write(&this, value.clone());
            TExit::Succeed(())
        })
    }

    /// Applies `f` to the value.
    #[must_use]
    pub fn update<E: Data>(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> Stm<(), E> {
        self.modify(move |a| ((), f(a)))
    }

    /// Computes a result and a new value from the current one.
    #[must_use]
    pub fn modify<B: Data, E: Data>(
        &self,
        f: impl Fn(A) -> (B, A) + Send + Sync + 'static,
    ) -> Stm<B, E> {
        let this = self.clone();
        Stm::new(move |journal| {
            let (out, next) = f(journal.read(&this));
            journal.write(&this, next);
            TExit::Succeed(out)
        })
    }

    /// Replaces the value, returning the previous one.
    #[must_use]
    pub fn get_and_set<E: Data>(&self, value: A) -> Stm<A, E> {
        self.modify(move |old| (old, value.clone()))
    }

    /// Applies `f`, returning the previous value.
    #[must_use]
    pub fn get_and_update<E: Data>(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> Stm<A, E> {
        self.modify(move |old| {
            let next = f(old.clone());
            (old, next)
        })
    }

    /// Applies `f`, returning the new value.
    #[must_use]
    pub fn update_and_get<E: Data>(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> Stm<A, E> {
        self.modify(move |old| {
            let next = f(old);
            (next.clone(), next)
        })
    }
}
