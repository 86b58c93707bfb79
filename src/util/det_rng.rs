//! Deterministic pseudo-random number generator.
//!
//! Schedules that add jitter must stay pure functions of their input and
//! state, so randomness comes from a seeded xorshift64 generator carried in
//! the schedule state rather than from a thread-local source.

/// A deterministic pseudo-random number generator using xorshift64.
///
/// Not cryptographically secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Creates a new PRNG with the given seed.
    ///
    /// A zero seed is replaced with 1, since xorshift never leaves zero.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Generates the next pseudo-random u64 value.
    #[allow(clippy::missing_const_for_fn)]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Generates a value uniformly distributed in `[0, 1)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn next_f64(&mut self) -> f64 {
        // 53 significant bits fit exactly in an f64 mantissa.
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generates a value in `[min, max)`. Returns `min` when the range is empty.
    pub fn next_f64_range(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        self.next_f64().mul_add(max - min, min)
    }
}
