//! Terminal outcome of a fiber.

use crate::types::cause::{Cause, Defect};
use crate::types::id::FiberId;

/// How a fiber ended: with a value or with a [`Cause`].
///
/// Once a fiber is done its exit never changes; every joiner observes the
/// same value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Exit<A, E> {
    /// The fiber produced a value.
    Success(A),
    /// The fiber failed, died or was interrupted.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// A successful exit.
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// A typed failure.
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// An exit with the given cause.
    pub const fn fail_cause(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// A defect.
    pub fn die(message: impl Into<String>) -> Self {
        Self::Failure(Cause::Die(Defect::new(message)))
    }

    /// An interruption by `by`.
    pub const fn interrupt(by: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(by))
    }

    /// Returns `true` for a successful exit.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` for a failed exit.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns `true` if the exit carries an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Success(_) => false,
            Self::Failure(cause) => cause.is_interrupted(),
        }
    }

    /// The success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(a) => Some(a),
            Self::Failure(_) => None,
        }
    }

    /// The failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(c) => Some(c),
        }
    }

    /// Maps the success value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B, E> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(c) => Exit::Failure(c),
        }
    }

    /// Maps typed failures.
    pub fn map_err<E2>(self, f: impl Fn(E) -> E2) -> Exit<A, E2> {
        match self {
            Self::Success(a) => Exit::Success(a),
            Self::Failure(c) => Exit::Failure(c.map(f)),
        }
    }

    /// Converts into a `Result`, keeping the full cause on failure.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(c) => Err(c),
        }
    }

    /// Combines two exits of concurrent computations.
    ///
    /// Failures on both sides are kept with [`Cause::Both`].
    pub fn zip_par<B>(self, that: Exit<B, E>) -> Exit<(A, B), E> {
        match (self, that) {
            (Self::Success(a), Exit::Success(b)) => Exit::Success((a, b)),
            (Self::Failure(l), Exit::Failure(r)) => Exit::Failure(l.both(r)),
            (Self::Failure(c), _) | (_, Exit::Failure(c)) => Exit::Failure(c),
        }
    }

    /// Combines two exits of sequential computations.
    ///
    /// Failures on both sides are kept with [`Cause::Then`].
    pub fn zip_seq<B>(self, that: Exit<B, E>) -> Exit<(A, B), E> {
        match (self, that) {
            (Self::Success(a), Exit::Success(b)) => Exit::Success((a, b)),
            (Self::Failure(l), Exit::Failure(r)) => Exit::Failure(l.then(r)),
            (Self::Failure(c), _) | (_, Exit::Failure(c)) => Exit::Failure(c),
        }
    }
}

impl<A, E> From<Result<A, E>> for Exit<A, E> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Self::Success(a),
            Err(e) => Self::fail(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_par_keeps_both_failures() {
        let l: Exit<u8, &str> = Exit::fail("l");
        let r: Exit<u8, &str> = Exit::fail("r");
        let zipped = l.zip_par(r);
        let cause = zipped.cause().cloned().unwrap();
        assert!(matches!(cause, Cause::Both(_, _)));
        assert_eq!(cause.failures(), vec![&"l", &"r"]);
    }

    #[test]
    fn zip_seq_uses_then() {
        let l: Exit<u8, &str> = Exit::fail("l");
        let r: Exit<u8, &str> = Exit::die("r");
        assert!(matches!(l.zip_seq(r), Exit::Failure(Cause::Then(_, _))));
    }

    #[test]
    fn zip_success() {
        let l: Exit<u8, ()> = Exit::succeed(1);
        let r: Exit<&str, ()> = Exit::succeed("a");
        assert_eq!(l.zip_par(r), Exit::succeed((1, "a")));
    }

    #[test]
    fn interrupted_exit() {
        let e: Exit<(), ()> = Exit::interrupt(FiberId::single(1, 0));
        assert!(e.is_interrupted());
        assert!(e.is_failure());
        assert!(!Exit::<(), ()>::succeed(()).is_interrupted());
    }

    #[test]
    fn from_result() {
        let e: Exit<u8, &str> = Err("x").into();
        assert_eq!(e.into_result(), Err(Cause::fail("x")));
    }
}
