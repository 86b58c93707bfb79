//! Fiber runtime E2E tests.
//!
//! Covers:
//! - join(fork(e)) behaves like e, for values, failures and defects
//! - interrupting a parent runs its children's finalizers before the
//!   interruption completes
//! - uninterruptible regions finish before an interruption takes effect
//! - FiberRefs flow into children on fork and back on join
//! - shutdown interrupts root fibers and runs their finalizers
//! - interrupting a suspended fiber runs the canceler of its wait

#[macro_use]
mod common;

use common::*;
use fibril::runtime::FiberStatus;
use fibril::sync::Deferred;
use fibril::{Cause, Effect, Exit, FiberRef};
use std::convert::Infallible;
use std::time::Duration;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

#[test]
fn join_of_fork_matches_direct_run() {
    init_test("join_of_fork_matches_direct_run");
    let runtime = live_runtime();

    let cases: Vec<Effect<u32, String>> = vec![
        Effect::succeed(7),
        Effect::sync(|| 6).map(|n| n * 7),
        Effect::fail("nope".to_string()),
        Effect::die("boom"),
    ];
    for effect in cases {
        let direct = runtime.run_sync_exit(effect.clone());
        let joined = runtime.run_sync_exit(effect.fork().flat_map(|h| h.join()));
        assert_with_log!(
            direct.is_success() == joined.is_success(),
            "same outcome kind",
            direct.is_success(),
            joined.is_success()
        );
        match (&direct, &joined) {
            (Exit::Success(a), Exit::Success(b)) => assert_eq!(a, b),
            (Exit::Failure(a), Exit::Failure(b)) => {
                assert_eq!(a.failures(), b.failures());
                assert_eq!(a.is_die(), b.is_die());
            }
            _ => unreachable!(),
        }
    }
    test_complete!("join_of_fork_matches_direct_run");
}

#[test]
fn typed_handlers_do_not_swallow_defects() {
    init_test("typed_handlers_do_not_swallow_defects");
    let runtime = live_runtime();

    let caught = runtime.run_sync(
        Effect::<u8, String>::fail("typed".into()).catch_all(|_| Effect::<u8, String>::succeed(1)),
    );
    assert_with_log!(caught == Ok(1), "typed failure recovered", Ok::<u8, ()>(1), caught);

    let defect = runtime.run_sync(
        Effect::<u8, String>::die("broken").catch_all(|_| Effect::<u8, String>::succeed(1)),
    );
    let cause = defect.expect_err("defect must pass through catch_all");
    assert_with_log!(cause.is_die(), "defect kept", true, cause.is_die());

    let panicked = runtime.run_sync(Effect::<u8, String>::sync(|| panic!("kaboom")));
    let cause = panicked.expect_err("panic becomes a defect");
    assert!(cause.is_die());
    assert!(cause.pretty().contains("kaboom"), "{}", cause.pretty());

    let recovered = runtime.run_sync(
        Effect::<u8, String>::die("broken")
            .catch_all_cause(|cause| Effect::<u8, String>::succeed(u8::from(cause.is_die()))),
    );
    assert_eq!(recovered, Ok(1));
    test_complete!("typed_handlers_do_not_swallow_defects");
}

#[test]
fn interrupting_parent_finalizes_children_first() {
    init_test("interrupting_parent_finalizes_children_first");
    let runtime = live_runtime();
    let log = event_log();
    let started: Deferred<(), Infallible> = Deferred::new();

    let child = started
        .succeed::<Infallible>(())
        .and_then(Effect::<(), Infallible>::never())
        .ensuring(record::<Infallible>(&log, "child finalizer"));
    let parent = child
        .fork::<Infallible>()
        .and_then(Effect::<(), Infallible>::never())
        .ensuring(record::<Infallible>(&log, "parent finalizer"));

    let handle = runtime.fork(parent).expect("fork parent");
    runtime
        .run_sync(started.await_value())
        .expect("child started");

    test_section!("interrupt");
    let exit = runtime
        .run_sync(handle.interrupt::<Infallible>())
        .expect("interrupt completes");
    assert_with_log!(exit.is_interrupted(), "parent interrupted", true, exit.is_interrupted());

    let events = runtime.run_sync(log.get::<Infallible>()).expect("log");
    assert_with_log!(
        events.contains(&"child finalizer".to_string())
            && events.contains(&"parent finalizer".to_string()),
        "both finalizers ran before interrupt returned",
        "child + parent",
        events
    );
    assert_eq!(handle.status(), FiberStatus::Done);
    test_complete!("interrupting_parent_finalizes_children_first");
}

#[test]
fn uninterruptible_region_completes_before_interruption() {
    init_test("uninterruptible_region_completes_before_interruption");
    let runtime = live_runtime();
    let log = event_log();
    let entered: Deferred<(), Infallible> = Deferred::new();

    let critical = entered
        .succeed::<Infallible>(())
        .and_then(Effect::<(), Infallible>::sleep(Duration::from_millis(30)))
        .and_then(record::<Infallible>(&log, "critical done"))
        .uninterruptible()
        .and_then(record::<Infallible>(&log, "after critical"));

    let handle = runtime.fork(critical).expect("fork");
    runtime.run_sync(entered.await_value()).expect("entered");
    let exit = runtime
        .run_sync(handle.interrupt::<Infallible>())
        .expect("interrupt");

    let events = runtime.run_sync(log.get::<Infallible>()).expect("log");
    assert!(exit.is_interrupted());
    assert_with_log!(
        events == vec!["critical done".to_string()],
        "region finished, rest skipped",
        vec!["critical done"],
        events
    );
    test_complete!("uninterruptible_region_completes_before_interruption");
}

#[test]
fn fiber_refs_flow_through_fork_and_join() {
    init_test("fiber_refs_flow_through_fork_and_join");
    let runtime = live_runtime();
    let counter = runtime.fiber_ref(FiberRef::builder(0u32));

    test_section!("join merges the child's edits");
    let (c1, c2) = (counter.clone(), counter.clone());
    let joined = counter
        .set::<Infallible>(10)
        .and_then(
            c1.update::<Infallible>(|v| v + 1)
                .and_then(c1.get())
                .fork(),
        )
        .flat_map(move |h| h.join().zip(c2.get()));
    let (child_saw, parent_after) = runtime.run_sync(joined).expect("joined");
    assert_with_log!(child_saw == 11, "child started from parent value", 11, child_saw);
    assert_with_log!(parent_after == 11, "parent sees child edit", 11, parent_after);

    test_section!("await_exit alone does not merge");
    let (c1, c2) = (counter.clone(), counter.clone());
    let awaited = counter
        .set::<Infallible>(10)
        .and_then(c1.set::<Infallible>(99).fork())
        .flat_map(move |h| h.await_exit().and_then(c2.get()));
    let parent_value = runtime.run_sync(awaited).expect("awaited");
    assert_with_log!(parent_value == 10, "parent untouched", 10, parent_value);

    test_section!("custom fork and join");
    let depth = runtime.fiber_ref(
        FiberRef::builder(0u32)
            .fork(|parent| parent + 1)
            .join(|parent, _child| *parent),
    );
    let d = depth.clone();
    let nested = depth
        .get::<Infallible>()
        .fork()
        .flat_map(move |h| h.join().zip(d.get()));
    let (child_depth, parent_depth) = runtime.run_sync(nested).expect("nested");
    assert_eq!((child_depth, parent_depth), (1, 0));
    test_complete!("fiber_refs_flow_through_fork_and_join");
}

#[test]
fn supervised_children_end_with_parent_but_daemons_do_not() {
    init_test("supervised_children_end_with_parent_but_daemons_do_not");
    let runtime = live_runtime();
    let release: Deferred<u8, Infallible> = Deferred::new();

    let r = release.clone();
    let spawn = Effect::<(), Infallible>::never()
        .fork::<Infallible>()
        .zip(r.await_value().fork_daemon());
    let (child, daemon) = runtime.run_sync(spawn).expect("spawned");

    let child_exit = child.wait();
    assert_with_log!(
        child_exit.is_interrupted(),
        "supervised child interrupted when parent ended",
        true,
        child_exit.is_interrupted()
    );
    assert!(!daemon.is_done());

    runtime
        .run_sync(release.succeed::<Infallible>(5))
        .expect("release");
    let daemon_exit = daemon.wait();
    assert_eq!(daemon_exit, Exit::Success(5));
    test_complete!("supervised_children_end_with_parent_but_daemons_do_not");
}

#[test]
fn shutdown_runs_root_finalizers() {
    init_test("shutdown_runs_root_finalizers");
    let runtime = live_runtime();
    let log = event_log();
    let started: Deferred<(), Infallible> = Deferred::new();

    let root = started
        .succeed::<Infallible>(())
        .and_then(Effect::<(), Infallible>::never())
        .ensuring(record::<Infallible>(&log, "root finalizer"));
    let handle = runtime.fork(root).expect("fork root");
    runtime.run_sync(started.await_value()).expect("started");

    runtime.shutdown().expect("clean shutdown");
    assert!(runtime.is_shut_down());
    assert_eq!(handle.status(), FiberStatus::Done);
    assert_eq!(log.peek(), vec!["root finalizer".to_string()]);

    let rejected = runtime.fork(Effect::<(), Infallible>::unit());
    assert!(rejected.is_err());
    test_complete!("shutdown_runs_root_finalizers");
}

#[test]
fn interrupt_cause_names_the_interruptor() {
    init_test("interrupt_cause_names_the_interruptor");
    let runtime = live_runtime();

    let program = Effect::<(), Infallible>::never()
        .fork::<Infallible>()
        .flat_map(|h| {
            Effect::<fibril::FiberId, Infallible>::fiber_id()
                .zip(h.interrupt())
        });
    let (me, exit) = runtime.run_sync(program).expect("program");
    let interruptors = exit.cause().map(Cause::interruptors).unwrap_or_default();
    assert_with_log!(
        interruptors.contains(&me),
        "interruptor recorded",
        me,
        interruptors
    );
    test_complete!("interrupt_cause_names_the_interruptor");
}

#[test]
fn interrupting_a_sleeper_cancels_its_timer() {
    init_test("interrupting_a_sleeper_cancels_its_timer");
    let runtime = test_runtime();
    let clock = runtime.test_clock().expect("test clock");

    let sleeper = runtime
        .fork(Effect::<(), Infallible>::sleep(Duration::from_secs(60)))
        .expect("fork sleeper");
    runtime.await_suspended().expect("sleeper suspended");
    assert_eq!(clock.pending_sleeps(), vec![60_000]);

    let exit = runtime
        .run_sync(sleeper.interrupt::<Infallible>())
        .expect("interrupt");
    assert!(exit.is_interrupted(), "{exit:?}");
    let pending = clock.pending_sleeps();
    assert_with_log!(pending.is_empty(), "timer cancelled", "[]", pending);
    test_complete!("interrupting_a_sleeper_cancels_its_timer");
}

#[test]
fn interrupted_waiter_does_not_see_a_later_completion() {
    init_test("interrupted_waiter_does_not_see_a_later_completion");
    let runtime = live_runtime();
    let deferred: Deferred<u8, Infallible> = Deferred::new();

    let waiter = runtime.fork(deferred.await_value()).expect("fork waiter");
    wait_until(Duration::from_secs(5), "waiter suspended", || {
        deferred.waiters() == 1
    });
    let exit = runtime
        .run_sync(waiter.interrupt::<Infallible>())
        .expect("interrupt");
    assert!(exit.is_interrupted(), "{exit:?}");
    assert_eq!(deferred.waiters(), 0, "waiter removed on interrupt");

    let won = runtime
        .run_sync(deferred.succeed::<Infallible>(1))
        .expect("complete");
    assert!(won);
    assert!(waiter.wait().is_interrupted());
    test_complete!("interrupted_waiter_does_not_see_a_later_completion");
}
