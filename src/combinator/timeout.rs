//! Time limits measured on the runtime clock.
//!
//! A timeout is a race against a sleep, so it follows virtual time under a
//! [`TestClock`](crate::time::TestClock) and interrupts the timed effect
//! when the limit passes first.

use super::race::race;
use crate::effect::{Data, Effect};
use std::time::Duration;

/// Runs `effect` with a time limit. Yields `None` if the limit passes first.
#[must_use]
pub fn timeout<A: Data, E: Data>(effect: Effect<A, E>, limit: Duration) -> Effect<Option<A>, E> {
    let timer = Effect::<(), E>::sleep(limit).as_value(None);
    race(effect.map(Some), timer)
}

/// Like [`timeout`], but fails with `on_timeout` when the limit passes.
#[must_use]
pub fn timeout_fail<A: Data, E: Data>(effect: Effect<A, E>, limit: Duration, on_timeout: E) -> Effect<A, E> {
    timeout(effect, limit).flat_map(move |value| match value {
        Some(a) => Effect::succeed(a),
        None => Effect::fail(on_timeout.clone()),
    })
}

impl<A: Data, E: Data> Effect<A, E> {
    /// Gives up with `None` after `limit`, interrupting `self`.
    #[must_use]
    pub fn timeout(self, limit: Duration) -> Effect<Option<A>, E> {
        timeout(self, limit)
    }

    /// Fails with `on_timeout` after `limit`, interrupting `self`.
    #[must_use]
    pub fn timeout_fail(self, limit: Duration, on_timeout: E) -> Self {
        timeout_fail(self, limit, on_timeout)
    }
}
