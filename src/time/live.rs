//! Wall-clock time with a timer driver thread.

use super::{Clock, TimerCallback, TimerHeap, TimerId};
use crate::error::{Error, ErrorKind};
use crate::tracing_compat::trace;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Longest single wait of the driver, so clock jumps are picked up.
const MAX_DRIVER_WAIT: Duration = Duration::from_millis(250);

struct DriverState {
    timers: TimerHeap,
    shutdown: bool,
}

struct Shared {
    state: Mutex<DriverState>,
    cvar: Condvar,
}

/// Milliseconds since the Unix epoch from the system clock.
pub(crate) fn system_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// The production clock.
///
/// Timers are kept in a deadline heap served by one driver thread, which
/// runs each callback outside the heap lock once its deadline has passed.
pub struct LiveClock {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LiveClock {
    /// Starts the driver thread, named `{name}-timer`.
    pub fn start(name: &str) -> Result<Arc<Self>, Error> {
        let shared = Arc::new(Shared {
            state: Mutex::new(DriverState {
                timers: TimerHeap::new(),
                shutdown: false,
            }),
            cvar: Condvar::new(),
        });
        let driver_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("{name}-timer"))
            .spawn(move || drive(&driver_shared))
            .map_err(|e| {
                Error::new(ErrorKind::ThreadSpawn)
                    .with_message("failed to spawn timer driver")
                    .with_source(e)
            })?;
        Ok(Arc::new(Self {
            shared,
            driver: Mutex::new(Some(handle)),
        }))
    }

    /// Number of timers waiting to fire.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.shared.state.lock().timers.len()
    }

    /// Stops the driver thread. Pending timers are dropped unfired.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.timers.clear();
        }
        self.shared.cvar.notify_all();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn drive(shared: &Shared) {
    trace!("timer driver started");
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let now = system_millis();
        if let Some((deadline, callback)) = state.timers.pop_expired(now) {
            drop(state);
            trace!(deadline, now, "timer fired");
            callback();
            state = shared.state.lock();
            continue;
        }
        let wait = state.timers.peek_deadline().map_or(MAX_DRIVER_WAIT, |deadline| {
            let millis = u64::try_from(deadline.saturating_sub(now)).unwrap_or(0);
            Duration::from_millis(millis).min(MAX_DRIVER_WAIT)
        });
        let _ = shared.cvar.wait_for(&mut state, wait);
    }
    trace!("timer driver stopped");
}

impl Clock for LiveClock {
    fn current_time_millis(&self) -> i64 {
        system_millis()
    }

    fn register_timer(&self, deadline_millis: i64, callback: TimerCallback) -> TimerId {
        let id = self.shared.state.lock().timers.insert(deadline_millis, callback);
        self.shared.cvar.notify_one();
        id
    }

    fn cancel_timer(&self, id: TimerId) -> bool {
        self.shared.state.lock().timers.cancel(id)
    }

    fn clear_timers(&self) -> usize {
        self.shared.state.lock().timers.clear()
    }
}

impl Drop for LiveClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn timer_fires_after_deadline() {
        let clock = LiveClock::start("test-live").expect("start");
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        let deadline = clock.current_time_millis() + 30;
        clock.register_timer(deadline, Box::new(move || tx.send(()).expect("send")));
        rx.recv_timeout(Duration::from_secs(5)).expect("timer fired");
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let clock = LiveClock::start("test-live").expect("start");
        let (tx, rx) = mpsc::channel::<()>();
        let id = clock.register_timer(
            clock.current_time_millis() + 20,
            Box::new(move || tx.send(()).expect("send")),
        );
        assert!(clock.cancel_timer(id));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn past_deadline_fires_promptly() {
        let clock = LiveClock::start("test-live").expect("start");
        let (tx, rx) = mpsc::channel();
        clock.register_timer(0, Box::new(move || tx.send(()).expect("send")));
        rx.recv_timeout(Duration::from_secs(1)).expect("timer fired");
    }

    #[test]
    fn stop_drops_pending_timers() {
        let clock = LiveClock::start("test-live").expect("start");
        clock.register_timer(i64::MAX, Box::new(|| {}));
        assert_eq!(clock.pending_timers(), 1);
        clock.stop();
        assert_eq!(clock.pending_timers(), 0);
    }
}
