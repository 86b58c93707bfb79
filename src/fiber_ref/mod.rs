//! Fiber-local references.
//!
//! A [`FiberRef`] holds one value per fiber. Forking copies the parent's
//! values into the child (through the ref's fork patch) and joining merges
//! the child's edits back into the joiner, so fiber-local state behaves like
//! a value that flows along the structured fork/join tree.
//!
//! Each runtime owns a [`FiberRefRegistry`] that hands out ref ids and keeps
//! the built-in refs used by effect logging.

mod refs;

pub use refs::FiberRefs;

use crate::effect::op::{downcast, erase, AnyValue, Data, Op};
use crate::effect::{Effect, LogLevel};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of a fiber ref within its registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberRefId(u64);

impl FiberRefId {
    /// Raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Computes and applies patches between two values of `A`.
pub trait Differ<A>: Send + Sync + 'static {
    /// Description of an edit.
    type Patch: Data;

    /// The patch that changes nothing.
    fn empty(&self) -> Self::Patch;

    /// The patch turning `old` into `new`.
    fn diff(&self, old: &A, new: &A) -> Self::Patch;

    /// A patch applying `first` then `second`.
    fn combine(&self, first: &Self::Patch, second: &Self::Patch) -> Self::Patch;

    /// Applies `patch` to `old`.
    fn patch(&self, patch: &Self::Patch, old: &A) -> A;
}

/// Replace-the-value differ: the last writer wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateDiffer;

impl<A: Data + PartialEq> Differ<A> for UpdateDiffer {
    type Patch = Option<A>;

    fn empty(&self) -> Self::Patch {
        None
    }

    fn diff(&self, old: &A, new: &A) -> Self::Patch {
        if old == new {
            None
        } else {
            Some(new.clone())
        }
    }

    fn combine(&self, first: &Self::Patch, second: &Self::Patch) -> Self::Patch {
        second.clone().or_else(|| first.clone())
    }

    fn patch(&self, patch: &Self::Patch, old: &A) -> A {
        patch.clone().unwrap_or_else(|| old.clone())
    }
}

/// Edit of a string map: keys set and keys removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MapPatch {
    set: BTreeMap<String, String>,
    removed: Vec<String>,
}

/// Key-wise differ for string maps, so concurrent edits of distinct keys
/// merge instead of overwriting each other.
#[derive(Clone, Copy, Debug, Default)]
pub struct MapDiffer;

impl Differ<BTreeMap<String, String>> for MapDiffer {
    type Patch = MapPatch;

    fn empty(&self) -> MapPatch {
        MapPatch::default()
    }

    fn diff(&self, old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> MapPatch {
        let set = new
            .iter()
            .filter(|(k, v)| old.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let removed = old.keys().filter(|k| !new.contains_key(*k)).cloned().collect();
        MapPatch { set, removed }
    }

    fn combine(&self, first: &MapPatch, second: &MapPatch) -> MapPatch {
        let mut out = first.clone();
        for key in &second.removed {
            out.set.remove(key);
            if !out.removed.contains(key) {
                out.removed.push(key.clone());
            }
        }
        for (k, v) in &second.set {
            out.removed.retain(|r| r != k);
            out.set.insert(k.clone(), v.clone());
        }
        out
    }

    fn patch(&self, patch: &MapPatch, old: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut out = old.clone();
        for key in &patch.removed {
            out.remove(key);
        }
        for (k, v) in &patch.set {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

/// Key/value annotations attached to every effect log line of a fiber.
pub type LogAnnotations = BTreeMap<String, String>;

pub(crate) trait ErasedRef: Send + Sync {
    fn id(&self) -> FiberRefId;
    fn initial(&self) -> AnyValue;
    fn fork(&self, value: &AnyValue) -> AnyValue;
    fn join(&self, parent: &AnyValue, child: &AnyValue) -> AnyValue;
    fn diff(&self, old: &AnyValue, new: &AnyValue) -> AnyValue;
    fn patch(&self, patch: &AnyValue, old: &AnyValue) -> AnyValue;
    fn same(&self, a: &AnyValue, b: &AnyValue) -> bool;
    fn has_custom_fork(&self) -> bool;
}

type ForkFn<A> = Arc<dyn Fn(&A) -> A + Send + Sync>;
type JoinFn<A> = Arc<dyn Fn(&A, &A) -> A + Send + Sync>;
type DiffFn<A> = Arc<dyn Fn(&A, &A) -> AnyValue + Send + Sync>;
type PatchFn<A> = Arc<dyn Fn(&AnyValue, &A) -> A + Send + Sync>;

struct RefDef<A> {
    id: FiberRefId,
    initial: A,
    fork: ForkFn<A>,
    join: JoinFn<A>,
    diff: DiffFn<A>,
    patch: PatchFn<A>,
    custom_fork: bool,
}

impl<A: Data + PartialEq> RefDef<A> {
    fn typed<'a>(&'a self, value: &'a AnyValue) -> &'a A {
        value.downcast_ref::<A>().unwrap_or(&self.initial)
    }
}

impl<A: Data + PartialEq> ErasedRef for RefDef<A> {
    fn id(&self) -> FiberRefId {
        self.id
    }

    fn initial(&self) -> AnyValue {
        erase(self.initial.clone())
    }

    fn fork(&self, value: &AnyValue) -> AnyValue {
        erase((self.fork)(self.typed(value)))
    }

    fn join(&self, parent: &AnyValue, child: &AnyValue) -> AnyValue {
        erase((self.join)(self.typed(parent), self.typed(child)))
    }

    fn diff(&self, old: &AnyValue, new: &AnyValue) -> AnyValue {
        (self.diff)(self.typed(old), self.typed(new))
    }

    fn patch(&self, patch: &AnyValue, old: &AnyValue) -> AnyValue {
        erase((self.patch)(patch, self.typed(old)))
    }

    fn same(&self, a: &AnyValue, b: &AnyValue) -> bool {
        self.typed(a) == self.typed(b)
    }

    fn has_custom_fork(&self) -> bool {
        self.custom_fork
    }
}

/// A fiber-local variable.
pub struct FiberRef<A> {
    def: Arc<RefDef<A>>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRef")
            .field("id", &self.def.id)
            .field("initial", &self.def.initial)
            .finish()
    }
}

/// Configures a [`FiberRef`] before it is registered.
pub struct FiberRefBuilder<A> {
    initial: A,
    fork: ForkFn<A>,
    join: JoinFn<A>,
    diff: DiffFn<A>,
    patch: PatchFn<A>,
    custom_fork: bool,
}

impl<A: Data + PartialEq> FiberRefBuilder<A> {
    fn new(initial: A) -> Self {
        let differ = Arc::new(UpdateDiffer);
        let (diff, patch) = differ_fns::<A, UpdateDiffer>(differ);
        Self {
            initial,
            fork: Arc::new(A::clone),
            join: Arc::new(|_, child| child.clone()),
            diff,
            patch,
            custom_fork: false,
        }
    }

    /// Value a child starts with, given the parent's.
    ///
    /// Applies on every fork, including when the parent still holds the
    /// initial value.
    #[must_use]
    pub fn fork(mut self, f: impl Fn(&A) -> A + Send + Sync + 'static) -> Self {
        self.fork = Arc::new(f);
        self.custom_fork = true;
        self
    }

    /// Merges the parent's value with the patched child value.
    #[must_use]
    pub fn join(mut self, f: impl Fn(&A, &A) -> A + Send + Sync + 'static) -> Self {
        self.join = Arc::new(f);
        self
    }

    /// Replaces the default replace-the-value differ.
    #[must_use]
    pub fn differ<D: Differ<A>>(mut self, differ: D) -> Self {
        let (diff, patch) = differ_fns::<A, D>(Arc::new(differ));
        self.diff = diff;
        self.patch = patch;
        self
    }

    /// Registers the ref with `registry`.
    #[must_use]
    pub fn build(self, registry: &FiberRefRegistry) -> FiberRef<A> {
        let id = registry.next_id();
        let fiber_ref = self.build_with_id(id);
        if fiber_ref.def.custom_fork {
            registry.forking.write().push(fiber_ref.erased());
        }
        fiber_ref
    }

    fn build_with_id(self, id: FiberRefId) -> FiberRef<A> {
        FiberRef {
            def: Arc::new(RefDef {
                id,
                initial: self.initial,
                fork: self.fork,
                join: self.join,
                diff: self.diff,
                patch: self.patch,
                custom_fork: self.custom_fork,
            }),
        }
    }

    /// Registers the ref with the runtime the effect runs on.
    pub fn make<E: Data>(self) -> Effect<FiberRef<A>, E> {
        let builder = Arc::new(self);
        Effect::from_op(Op::with_fiber(move |scope| {
            let b = &*builder;
            let fiber_ref = FiberRefBuilder {
                initial: b.initial.clone(),
                fork: Arc::clone(&b.fork),
                join: Arc::clone(&b.join),
                diff: Arc::clone(&b.diff),
                patch: Arc::clone(&b.patch),
                custom_fork: b.custom_fork,
            }
            .build(scope.fiber.runtime().fiber_refs());
            Op::Succeed(erase(fiber_ref))
        }))
    }
}

fn differ_fns<A: Data, D: Differ<A>>(differ: Arc<D>) -> (DiffFn<A>, PatchFn<A>) {
    let d = Arc::clone(&differ);
    let diff: DiffFn<A> = Arc::new(move |old, new| erase(d.diff(old, new)));
    let patch: PatchFn<A> = Arc::new(move |p, old| match p.downcast_ref::<D::Patch>() {
        Some(p) => differ.patch(p, old),
        None => old.clone(),
    });
    (diff, patch)
}

impl<A: Data + PartialEq> FiberRef<A> {
    /// Starts configuring a ref with the given initial value.
    #[must_use]
    pub fn builder(initial: A) -> FiberRefBuilder<A> {
        FiberRefBuilder::new(initial)
    }

    /// Creates a ref with default fork, join and differ on the current runtime.
    pub fn make<E: Data>(initial: A) -> Effect<Self, E> {
        Self::builder(initial).make()
    }

    /// The registry id.
    #[must_use]
    pub fn id(&self) -> FiberRefId {
        self.def.id
    }

    /// Value seen by fibers that never set the ref.
    #[must_use]
    pub fn initial(&self) -> &A {
        &self.def.initial
    }

    pub(crate) fn erased(&self) -> Arc<dyn ErasedRef> {
        Arc::clone(&self.def) as Arc<dyn ErasedRef>
    }

    /// Reads the ref from a [`FiberRefs`] snapshot.
    #[must_use]
    pub fn get_from(&self, refs: &FiberRefs) -> A {
        refs.get(&self.erased())
            .downcast_ref::<A>()
            .cloned()
            .unwrap_or_else(|| self.def.initial.clone())
    }

    /// Current fiber's value.
    pub fn get<E: Data>(&self) -> Effect<A, E> {
        let this = self.clone();
        Effect::from_op(Op::with_fiber(move |scope| {
            let value = scope.refs.get(&this.erased());
            match downcast::<A>(value) {
                Ok(a) => Op::Succeed(erase(a)),
                Err(c) => Op::Fail(c),
            }
        }))
    }

    /// Sets the current fiber's value.
    pub fn set<E: Data>(&self, value: A) -> Effect<(), E> {
        self.modify(move |_| ((), value.clone()))
    }

    /// Applies `f` to the current fiber's value.
    pub fn update<E: Data>(&self, f: impl Fn(&A) -> A + Send + Sync + 'static) -> Effect<(), E> {
        self.modify(move |a| ((), f(a)))
    }

    /// Sets the value to `f`'s second result and returns its first.
    pub fn modify<B: Data, E: Data>(
        &self,
        f: impl Fn(&A) -> (B, A) + Send + Sync + 'static,
    ) -> Effect<B, E> {
        let this = self.clone();
        Effect::from_op(Op::with_fiber(move |scope| {
            let erased = this.erased();
            let current = scope.refs.get(&erased);
            let current = current.downcast_ref::<A>().unwrap_or(&this.def.initial);
            let (out, next) = f(current);
            let id = scope.fiber.id().clone();
            scope.refs.update_as(&id, &erased, erase(next));
            Op::Succeed(erase(out))
        }))
    }

    /// Returns the old value and sets a new one.
    pub fn get_and_set<E: Data>(&self, value: A) -> Effect<A, E> {
        self.modify(move |old| (old.clone(), value.clone()))
    }

    /// Sets the ref back to its initial value.
    pub fn reset<E: Data>(&self) -> Effect<(), E> {
        let initial = self.def.initial.clone();
        self.set(initial)
    }

    /// Runs `effect` with the ref set to `value`, restoring the old value
    /// afterwards, whatever the outcome.
    pub fn locally<B: Data, E: Data>(&self, value: A, effect: Effect<B, E>) -> Effect<B, E> {
        self.locally_with(move |_| value.clone(), effect)
    }

    /// Like [`FiberRef::locally`], deriving the scoped value from the current one.
    pub fn locally_with<B: Data, E: Data>(
        &self,
        f: impl Fn(&A) -> A + Send + Sync + 'static,
        effect: Effect<B, E>,
    ) -> Effect<B, E> {
        let this = self.clone();
        let f = Arc::new(f);
        Effect::uninterruptible_mask(move |restore| {
            let this = this.clone();
            let f = Arc::clone(&f);
            let effect = restore.apply(effect.clone());
            this.modify(move |old| (old.clone(), f(old)))
                .flat_map(move |old: A| effect.clone().ensuring(this.set::<std::convert::Infallible>(old)))
        })
    }
}

/// Hands out ref ids and owns the built-in refs of one runtime.
pub struct FiberRefRegistry {
    next: AtomicU64,
    // Refs whose fork patch must run even without an explicit value.
    forking: RwLock<Vec<Arc<dyn ErasedRef>>>,
    log_annotations: FiberRef<LogAnnotations>,
    log_level: FiberRef<LogLevel>,
}

impl fmt::Debug for FiberRefRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRefRegistry")
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for FiberRefRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FiberRefRegistry {
    const BUILTIN: u64 = 2;

    /// Creates a registry with its built-in refs.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(Self::BUILTIN),
            forking: RwLock::new(Vec::new()),
            log_annotations: FiberRef::builder(LogAnnotations::new())
                .differ(MapDiffer)
                .build_with_id(FiberRefId(0)),
            log_level: FiberRef::builder(LogLevel::Info).build_with_id(FiberRefId(1)),
        }
    }

    pub(crate) fn with_forking<R>(&self, f: impl FnOnce(&[Arc<dyn ErasedRef>]) -> R) -> R {
        f(&self.forking.read())
    }

    fn next_id(&self) -> FiberRefId {
        FiberRefId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of refs registered so far, built-ins included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Always `false`: the built-in refs exist from the start.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Annotations attached to effect log lines.
    #[must_use]
    pub fn log_annotations(&self) -> &FiberRef<LogAnnotations> {
        &self.log_annotations
    }

    /// Minimum level emitted by effect logging.
    #[must_use]
    pub fn log_level(&self) -> &FiberRef<LogLevel> {
        &self.log_level
    }
}
