//! Virtual time E2E tests.
//!
//! Covers:
//! - sleepers are released by `adjust` in deadline order
//! - retries and repeats follow schedule delays on virtual time
//! - timeouts fire on virtual time and interrupt the timed effect
//! - the warning when nobody advances a sleeping test clock

#[macro_use]
mod common;

use common::*;
use fibril::runtime::RuntimeBuilder;
use fibril::schedule::{recurs, spaced, ScheduleExt};
use fibril::sync::Ref;
use fibril::time::TestClock;
use fibril::Effect;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

fn clock_of(runtime: &fibril::Runtime) -> Arc<TestClock> {
    runtime.test_clock().expect("test runtime has a test clock")
}

#[test]
fn adjust_releases_sleepers_in_deadline_order() {
    init_test("adjust_releases_sleepers_in_deadline_order");
    let runtime = test_runtime();
    let clock = clock_of(&runtime);
    let log = event_log();

    for (name, secs) in [("late", 30u64), ("early", 10), ("middle", 20)] {
        let sleeper = Effect::<(), Infallible>::sleep(Duration::from_secs(secs))
            .and_then(record(&log, name));
        runtime.fork(sleeper).expect("fork sleeper");
    }
    runtime.await_suspended().expect("sleepers suspended");
    assert_eq!(clock.pending_sleeps(), vec![10_000, 20_000, 30_000]);

    test_section!("partial adjust");
    runtime
        .run_sync(clock.adjust::<Infallible>(Duration::from_secs(15)))
        .expect("adjust 15s");
    assert_with_log!(log.peek() == vec!["early"], "only the due sleeper ran", vec!["early"], log.peek());
    assert_eq!(clock.now_millis(), 15_000);

    test_section!("rest of the way");
    runtime
        .run_sync(clock.adjust::<Infallible>(Duration::from_secs(60)))
        .expect("adjust 60s");
    let events = log.peek();
    assert_with_log!(
        events == vec!["early", "middle", "late"],
        "deadline order",
        vec!["early", "middle", "late"],
        events
    );
    assert_eq!(clock.now_millis(), 75_000);
    assert!(clock.pending_sleeps().is_empty());
    test_complete!("adjust_releases_sleepers_in_deadline_order");
}

#[test]
fn sleeping_fiber_sees_virtual_time() {
    init_test("sleeping_fiber_sees_virtual_time");
    let runtime = test_runtime();
    let clock = clock_of(&runtime);

    let handle = runtime
        .fork(
            Effect::<(), Infallible>::sleep(Duration::from_secs(60))
                .and_then(Effect::current_time_millis()),
        )
        .expect("fork");
    runtime
        .run_sync(clock.adjust::<Infallible>(Duration::from_secs(60)))
        .expect("adjust");
    let woke_at = handle.wait();
    assert_eq!(woke_at.value(), Some(&60_000));

    runtime
        .run_sync(clock.set_time::<Infallible>(1_000_000))
        .expect("set time");
    let now = runtime
        .run_sync(Effect::<i64, Infallible>::current_time_millis())
        .expect("now");
    assert_eq!(now, 1_000_000);
    test_complete!("sleeping_fiber_sees_virtual_time");
}

#[test]
fn retry_sleeps_between_attempts() {
    init_test("retry_sleeps_between_attempts");
    let runtime = test_runtime();
    let clock = clock_of(&runtime);
    let attempts: Ref<Vec<i64>> = Ref::new(Vec::new());

    let a = attempts.clone();
    let flaky = Effect::<i64, String>::current_time_millis()
        .flat_map(move |now| {
            a.update_and_get(move |mut seen| {
                seen.push(now);
                seen
            })
        })
        .flat_map(|seen| {
            if seen.len() < 3 {
                Effect::fail(format!("attempt {} failed", seen.len()))
            } else {
                Effect::succeed(seen.len())
            }
        });
    let handle = runtime
        .fork(flaky.retry(spaced::<String>(Duration::from_secs(10))))
        .expect("fork");

    runtime
        .run_sync(clock.adjust::<Infallible>(Duration::from_secs(30)))
        .expect("adjust");
    assert_eq!(handle.wait().value(), Some(&3));
    let times = attempts.peek();
    assert_with_log!(
        times == vec![0, 10_000, 20_000],
        "attempt times follow the schedule",
        vec![0, 10_000, 20_000],
        times
    );
    test_complete!("retry_sleeps_between_attempts");
}

#[test]
fn retry_gives_up_when_schedule_ends() {
    init_test("retry_gives_up_when_schedule_ends");
    let runtime = test_runtime();
    let clock = clock_of(&runtime);

    let always_failing = Effect::<u8, String>::fail("down".into());
    let handle = runtime
        .fork(
            always_failing
                .retry_or_else(
                    recurs::<String>(2).intersect(spaced(Duration::from_secs(1))),
                    |error, (count, _)| Effect::<u8, String>::fail(format!("{error} after {count}")),
                ),
        )
        .expect("fork");
    runtime
        .run_sync(clock.adjust::<Infallible>(Duration::from_secs(5)))
        .expect("adjust");
    let exit = handle.wait();
    let failure = exit.cause().and_then(|c| c.first_failure()).cloned();
    assert_with_log!(
        failure.as_deref() == Some("down after 2"),
        "or_else sees the last error and output",
        "down after 2",
        failure
    );
    test_complete!("retry_gives_up_when_schedule_ends");
}

#[test]
fn repeat_collects_schedule_output() {
    init_test("repeat_collects_schedule_output");
    let runtime = test_runtime();
    let clock = clock_of(&runtime);
    let ticks = Ref::new(0u32);

    let t = ticks.clone();
    let handle = runtime
        .fork(
            t.update_and_get::<Infallible>(|n| n + 1)
                .repeat(recurs::<u32>(3).intersect(spaced(Duration::from_secs(1)))),
        )
        .expect("fork");
    runtime
        .run_sync(clock.adjust::<Infallible>(Duration::from_secs(10)))
        .expect("adjust");
    let exit = handle.wait();
    assert_eq!(exit.value().map(|(count, _)| *count), Some(3));
    assert_eq!(ticks.peek(), 4);
    test_complete!("repeat_collects_schedule_output");
}

#[test]
fn timeout_interrupts_slow_effects_on_virtual_time() {
    init_test("timeout_interrupts_slow_effects_on_virtual_time");
    let runtime = test_runtime();
    let clock = clock_of(&runtime);
    let log = event_log();

    let slow = Effect::<(), Infallible>::sleep(Duration::from_secs(60))
        .as_value(1u8)
        .on_interrupt(record(&log, "slow interrupted"));
    let fast = Effect::<(), Infallible>::sleep(Duration::from_secs(1)).as_value(2u8);

    let slow_handle = runtime
        .fork(slow.timeout(Duration::from_secs(5)))
        .expect("fork slow");
    let fast_handle = runtime
        .fork(fast.timeout(Duration::from_secs(5)))
        .expect("fork fast");
    runtime
        .run_sync(clock.adjust::<Infallible>(Duration::from_secs(10)))
        .expect("adjust");

    assert_eq!(slow_handle.wait().value(), Some(&None));
    assert_eq!(fast_handle.wait().value(), Some(&Some(2)));
    assert_eq!(log.peek(), vec!["slow interrupted".to_string()]);
    assert!(clock.pending_sleeps().is_empty());
    test_complete!("timeout_interrupts_slow_effects_on_virtual_time");
}

#[test]
fn warns_when_nobody_advances_the_clock() {
    init_test("warns_when_nobody_advances_the_clock");
    let runtime = RuntimeBuilder::test()
        .test_clock_warning_delay(Duration::from_millis(20))
        .build()
        .expect("runtime");
    let clock = clock_of(&runtime);

    runtime
        .fork(Effect::<(), Infallible>::sleep(Duration::from_secs(1)))
        .expect("fork");
    wait_until(Duration::from_secs(5), "sleep warning", || {
        !clock.warnings().is_empty()
    });
    let warnings = clock.warnings();
    assert_with_log!(warnings.len() == 1, "warned once", 1, warnings.len());
    test_complete!("warns_when_nobody_advances_the_clock");
}
