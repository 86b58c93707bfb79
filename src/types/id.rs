//! Identifier types for fibers.
//!
//! A [`FiberId`] names a fiber for the whole lifetime of the process. Ordering
//! by `(start_time_millis, id)` decides ancestor precedence when fiber-local
//! state is merged on join, so it must never change once assigned.

use core::fmt;
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

static FIBER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of a fiber, or of a group of fibers acting together.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
pub enum FiberId {
    /// No fiber. Identity element for [`FiberId::combine`].
    None,
    /// A single fiber.
    Single {
        /// Sequence number, unique within the process.
        id: u64,
        /// Wall or virtual clock time at which the fiber was created.
        start_time_millis: i64,
    },
    /// Several fibers, e.g. the interruptors of a parallel composition.
    Composite(BTreeSet<FiberId>),
}

impl FiberId {
    /// Allocates a fresh id stamped with `start_time_millis`.
    #[must_use]
    pub fn new(start_time_millis: i64) -> Self {
        let id = FIBER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::Single {
            id,
            start_time_millis,
        }
    }

    /// Builds a single id from raw parts.
    #[must_use]
    pub const fn single(id: u64, start_time_millis: i64) -> Self {
        Self::Single {
            id,
            start_time_millis,
        }
    }

    /// Returns `true` for [`FiberId::None`].
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Sequence number of a single id.
    #[must_use]
    pub const fn id(&self) -> Option<u64> {
        match self {
            Self::Single { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Start time of a single id.
    #[must_use]
    pub const fn start_time_millis(&self) -> Option<i64> {
        match self {
            Self::Single {
                start_time_millis, ..
            } => Some(*start_time_millis),
            _ => None,
        }
    }

    /// Every single id contained in `self`.
    #[must_use]
    pub fn singles(&self) -> BTreeSet<Self> {
        let mut out = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(next) = stack.pop() {
            match next {
                Self::None => {}
                Self::Single { .. } => {
                    out.insert(next.clone());
                }
                Self::Composite(ids) => stack.extend(ids.iter()),
            }
        }
        out
    }

    /// Combines two ids into one, flattening composites.
    #[must_use]
    pub fn combine(&self, that: &Self) -> Self {
        let mut singles = self.singles();
        singles.extend(that.singles());
        match singles.len() {
            0 => Self::None,
            1 => singles.into_iter().next().unwrap_or(Self::None),
            _ => Self::Composite(singles),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Single { .. } => 1,
            Self::Composite(_) => 2,
        }
    }
}

impl Default for FiberId {
    fn default() -> Self {
        Self::None
    }
}

impl Ord for FiberId {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self, other) {
            (
                Self::Single {
                    id: a,
                    start_time_millis: sa,
                },
                Self::Single {
                    id: b,
                    start_time_millis: sb,
                },
            ) => sa.cmp(sb).then(a.cmp(b)),
            (Self::Composite(a), Self::Composite(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for FiberId {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "FiberId(none)"),
            Self::Single {
                id,
                start_time_millis,
            } => write!(f, "FiberId(#{id}@{start_time_millis})"),
            Self::Composite(ids) => {
                write!(f, "FiberId(")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, "+")?;
                    }
                    write!(f, "{id}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "#none"),
            Self::Single { id, .. } => write!(f, "#{id}"),
            Self::Composite(ids) => {
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, "+")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
        }
    }
}
