//! Per-fiber storage of fiber ref values.

use super::{ErasedRef, FiberRefId, FiberRefRegistry};
use crate::effect::op::AnyValue;
use crate::types::FiberId;
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type Frames = SmallVec<[(FiberId, AnyValue); 2]>;

#[derive(Clone)]
struct RefStack {
    def: Arc<dyn ErasedRef>,
    // Oldest ancestor first; the last frame is the current value.
    frames: Frames,
}

impl RefStack {
    fn head(&self) -> Option<&(FiberId, AnyValue)> {
        self.frames.last()
    }
}

/// The fiber ref values of one fiber.
///
/// Each ref maps to a non-empty stack of `(fiber, value)` frames: the value
/// the fiber (or an ancestor) last set, preceded by the values of the
/// ancestors it was forked from. The stack lets [`FiberRefs::join_as`] find
/// the value parent and child last agreed on.
#[derive(Clone, Default)]
pub struct FiberRefs {
    locals: BTreeMap<FiberRefId, RefStack>,
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.locals
                    .iter()
                    .map(|(id, stack)| (id.as_u64(), stack.frames.len())),
            )
            .finish()
    }
}

impl FiberRefs {
    /// An empty set: every ref reads as its initial value.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of refs with an explicit value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    /// Returns `true` when no ref has an explicit value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    pub(crate) fn get(&self, def: &Arc<dyn ErasedRef>) -> AnyValue {
        self.locals
            .get(&def.id())
            .and_then(RefStack::head)
            .map_or_else(|| def.initial(), |(_, v)| Arc::clone(v))
    }

    /// Sets the value of `def` on behalf of `fiber_id`.
    ///
    /// A fiber that already owns the head frame overwrites it; otherwise it
    /// pushes its own frame on top of the ancestors'.
    pub(crate) fn update_as(&mut self, fiber_id: &FiberId, def: &Arc<dyn ErasedRef>, value: AnyValue) {
        match self.locals.get_mut(&def.id()) {
            None => {
                self.locals.insert(
                    def.id(),
                    RefStack {
                        def: Arc::clone(def),
                        frames: smallvec![(fiber_id.clone(), value)],
                    },
                );
            }
            Some(stack) => match stack.frames.last_mut() {
                Some((head_id, head_value)) if head_id == fiber_id => {
                    *head_value = value;
                }
                Some((_, head_value)) if def.same(head_value, &value) => {}
                _ => stack.frames.push((fiber_id.clone(), value)),
            },
        }
    }

    /// The refs a child forked with `child_id` starts with.
    ///
    /// Refs of `registry` with a custom fork patch are forked from their
    /// initial value when this fiber never set them.
    #[must_use]
    pub fn fork_as(&self, child_id: &FiberId, registry: &FiberRefRegistry) -> Self {
        let mut locals: BTreeMap<FiberRefId, RefStack> = self
            .locals
            .iter()
            .map(|(id, stack)| {
                let mut stack = stack.clone();
                if let Some((_, old)) = stack.head() {
                    let new = stack.def.fork(old);
                    if !stack.def.same(old, &new) {
                        stack.frames.push((child_id.clone(), new));
                    }
                }
                (*id, stack)
            })
            .collect();
        registry.with_forking(|forking| {
            for def in forking {
                if locals.contains_key(&def.id()) {
                    continue;
                }
                let initial = def.initial();
                let new = def.fork(&initial);
                if !def.same(&initial, &new) {
                    locals.insert(
                        def.id(),
                        RefStack {
                            def: Arc::clone(def),
                            frames: smallvec![(child_id.clone(), new)],
                        },
                    );
                }
            }
        });
        Self { locals }
    }

    /// Merges the refs of a finished child into `self`, as seen by `fiber_id`.
    ///
    /// For every ref the child changed since it last shared a value with
    /// this fiber, the change is replayed onto this fiber's current value as
    /// a patch and combined with the ref's join function.
    pub fn join_as(&mut self, fiber_id: &FiberId, child: &Self) {
        for (ref_id, child_stack) in &child.locals {
            let Some((child_head_id, child_value)) = child_stack.head() else {
                continue;
            };
            if child_head_id == fiber_id {
                continue;
            }
            let def = &child_stack.def;
            match self.locals.get_mut(ref_id) {
                None => {
                    let initial = def.initial();
                    if def.same(child_value, &initial) {
                        continue;
                    }
                    let joined = def.join(&initial, child_value);
                    self.locals.insert(
                        *ref_id,
                        RefStack {
                            def: Arc::clone(def),
                            frames: smallvec![(fiber_id.clone(), joined)],
                        },
                    );
                }
                Some(parent_stack) => {
                    let (ancestor, child_modified) =
                        find_ancestor(def, &parent_stack.frames, &child_stack.frames);
                    if !child_modified {
                        continue;
                    }
                    let Some((parent_head_id, old)) = parent_stack.frames.last().cloned() else {
                        continue;
                    };
                    let patch = def.diff(&ancestor, child_value);
                    let new = def.join(&old, &def.patch(&patch, &old));
                    if def.same(&old, &new) {
                        continue;
                    }
                    if &parent_head_id == fiber_id {
                        if let Some(head) = parent_stack.frames.last_mut() {
                            head.1 = new;
                        }
                    } else {
                        parent_stack.frames.push((fiber_id.clone(), new));
                    }
                }
            }
        }
    }

    /// Fiber ids that own a frame of any ref, for diagnostics.
    #[must_use]
    pub fn owners(&self) -> Vec<FiberId> {
        let mut out: Vec<FiberId> = self
            .locals
            .values()
            .flat_map(|s| s.frames.iter().map(|(id, _)| id.clone()))
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Walks both stacks from their heads toward the root, ordered by
/// `(start_time, id)`, until a frame owned by the same fiber appears in both.
///
/// Returns the child's value at that frame and whether the child moved past
/// it. Without a common frame the ref's initial value is the ancestor.
fn find_ancestor(
    def: &Arc<dyn ErasedRef>,
    parent: &[(FiberId, AnyValue)],
    child: &[(FiberId, AnyValue)],
) -> (AnyValue, bool) {
    let (mut pi, mut ci) = (parent.len(), child.len());
    let mut child_modified = false;
    while pi > 0 && ci > 0 {
        let (parent_id, _) = &parent[pi - 1];
        let (child_id, child_value) = &child[ci - 1];
        match parent_id.cmp(child_id) {
            std::cmp::Ordering::Less => {
                ci -= 1;
                child_modified = true;
            }
            std::cmp::Ordering::Greater => pi -= 1,
            std::cmp::Ordering::Equal => return (Arc::clone(child_value), child_modified),
        }
    }
    (def.initial(), true)
}
