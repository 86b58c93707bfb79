//! Half-open time intervals and normalised interval sets.
//!
//! All times are milliseconds since the Unix epoch. An [`Interval`] is the
//! range `[start, end)`; [`Intervals`] is a list of them kept sorted by start
//! with a gap between every pair of neighbours. Neighbours that overlap or
//! touch are merged, so `[0, 5) ∪ [5, 9)` is stored as `[0, 9)`.

use serde::Serialize;
use std::cmp::{max, min};
use std::time::Duration;

/// Open end used for "any time from now on".
pub const END_OF_TIME: i64 = i64::MAX;

/// The half-open range `[start_millis, end_millis)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Interval {
    start_millis: i64,
    end_millis: i64,
}

impl Interval {
    /// The canonical empty interval.
    pub const EMPTY: Self = Self {
        start_millis: 0,
        end_millis: 0,
    };

    /// Builds `[start, end)`. A reversed range yields [`Interval::EMPTY`].
    #[must_use]
    pub const fn new(start_millis: i64, end_millis: i64) -> Self {
        if start_millis > end_millis {
            Self::EMPTY
        } else {
            Self {
                start_millis,
                end_millis,
            }
        }
    }

    /// Everything from `start_millis` on.
    #[must_use]
    pub const fn after(start_millis: i64) -> Self {
        Self::new(start_millis, END_OF_TIME)
    }

    /// Inclusive start.
    #[must_use]
    pub const fn start(&self) -> i64 {
        self.start_millis
    }

    /// Exclusive end.
    #[must_use]
    pub const fn end(&self) -> i64 {
        self.end_millis
    }

    /// Returns `true` when no instant lies inside.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start_millis >= self.end_millis
    }

    /// Orders intervals by start time only.
    #[must_use]
    pub const fn less_than(&self, that: &Self) -> bool {
        self.start_millis < that.start_millis
    }

    /// The instants present in both intervals.
    #[must_use]
    pub fn intersect(&self, that: &Self) -> Self {
        Self::new(
            max(self.start_millis, that.start_millis),
            min(self.end_millis, that.end_millis),
        )
    }

    /// Length of the interval; zero for empty ones.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn size(&self) -> Duration {
        if self.is_empty() {
            Duration::ZERO
        } else {
            Duration::from_millis(self.end_millis.saturating_sub(self.start_millis) as u64)
        }
    }
}

/// A sorted set of disjoint, non-touching intervals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Intervals {
    intervals: Vec<Interval>,
}

impl Intervals {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }

    /// A set holding one interval (nothing if it is empty).
    #[must_use]
    pub fn single(interval: Interval) -> Self {
        if interval.is_empty() {
            Self::empty()
        } else {
            Self {
                intervals: vec![interval],
            }
        }
    }

    /// Everything from `start_millis` on.
    #[must_use]
    pub fn after(start_millis: i64) -> Self {
        Self::single(Interval::after(start_millis))
    }

    /// Normalises arbitrary intervals: sorts, drops empties, merges.
    #[must_use]
    pub fn make(intervals: impl IntoIterator<Item = Interval>) -> Self {
        let mut sorted: Vec<Interval> = intervals.into_iter().filter(|i| !i.is_empty()).collect();
        sorted.sort_by_key(|i| (i.start(), i.end()));
        let mut out: Vec<Interval> = Vec::with_capacity(sorted.len());
        for next in sorted {
            match out.last_mut() {
                Some(acc) if next.start() <= acc.end() => {
                    acc.end_millis = max(acc.end_millis, next.end());
                }
                _ => out.push(next),
            }
        }
        Self { intervals: out }
    }

    /// The intervals, sorted by start.
    #[must_use]
    pub fn as_slice(&self) -> &[Interval] {
        &self.intervals
    }

    /// Returns `true` when the set holds no interval.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Start of the first interval, or `0` when empty.
    #[must_use]
    pub fn start(&self) -> i64 {
        self.intervals
            .first()
            .map_or(Interval::EMPTY.start(), Interval::start)
    }

    /// End of the last interval, or `0` when empty.
    #[must_use]
    pub fn end(&self) -> i64 {
        self.intervals
            .last()
            .map_or(Interval::EMPTY.end(), Interval::end)
    }

    /// Compares two sets by their start.
    #[must_use]
    pub fn less_than(&self, that: &Self) -> bool {
        self.start() < that.start()
    }

    /// The later-starting of two sets.
    #[must_use]
    pub fn max(self, that: Self) -> Self {
        if self.less_than(&that) {
            that
        } else {
            self
        }
    }

    /// Union of two normalised sets in one merge pass.
    ///
    /// Heads are taken in start order; a running accumulator absorbs every
    /// head that overlaps or touches it and is flushed otherwise.
    #[must_use]
    pub fn union(&self, that: &Self) -> Self {
        let (mut left, mut right) = (self.intervals.iter().peekable(), that.intervals.iter().peekable());
        let mut out: Vec<Interval> = Vec::with_capacity(self.intervals.len() + that.intervals.len());
        let mut acc: Option<Interval> = None;
        loop {
            let next = match (left.peek(), right.peek()) {
                (None, None) => break,
                (Some(_), None) => left.next(),
                (None, Some(_)) => right.next(),
                (Some(l), Some(r)) => {
                    if l.less_than(r) {
                        left.next()
                    } else {
                        right.next()
                    }
                }
            };
            let Some(next) = next.copied() else { break };
            acc = Some(match acc {
                None => next,
                Some(current) if next.start() <= current.end() => {
                    Interval::new(current.start(), max(current.end(), next.end()))
                }
                Some(current) => {
                    out.push(current);
                    next
                }
            });
        }
        if let Some(last) = acc {
            out.push(last);
        }
        Self { intervals: out }
    }

    /// Intersection of two normalised sets, walking both in lockstep.
    ///
    /// After each comparison the head that ends first is dropped, since it
    /// cannot meet anything later in the other list.
    #[must_use]
    pub fn intersect(&self, that: &Self) -> Self {
        let (mut i, mut j) = (0, 0);
        let mut out = Vec::new();
        while i < self.intervals.len() && j < that.intervals.len() {
            let (l, r) = (self.intervals[i], that.intervals[j]);
            let both = l.intersect(&r);
            if !both.is_empty() {
                out.push(both);
            }
            if l.end() < r.end() {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self { intervals: out }
    }
}

impl From<Interval> for Intervals {
    fn from(interval: Interval) -> Self {
        Self::single(interval)
    }
}

impl FromIterator<Interval> for Intervals {
    fn from_iter<T: IntoIterator<Item = Interval>>(iter: T) -> Self {
        Self::make(iter)
    }
}
