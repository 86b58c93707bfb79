//! STM E2E tests.
//!
//! Covers:
//! - atomicity of many concurrent increments
//! - conservation of a total across concurrent transfers
//! - `retry` wakes only when a ref it read is written
//! - interrupting a retrying fiber unregisters it from the refs it read
//! - `or_else` rolls back the first branch
//! - typed failures publish, defects discard
//! - bounded transactional queues between fibers

#[macro_use]
mod common;

use common::*;
use fibril::combinator::{collect_all_par, for_each_par};
use fibril::stm::{Stm, TArray, TQueue, TRef};
use fibril::Effect;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

#[test]
fn concurrent_increments_are_atomic() {
    init_test("concurrent_increments_are_atomic");
    let runtime = live_runtime();
    let counter = TRef::new(0u64);

    let fibers = 64;
    let per_fiber = 25;
    let c = counter.clone();
    let program = for_each_par(0..fibers, move |_| {
        Effect::collect_all(
            (0..per_fiber).map(|_| c.update::<Infallible>(|n| n + 1).commit()),
        )
    });
    runtime.run_sync(program).expect("increments");

    let total = counter.peek();
    assert_with_log!(
        total == fibers * per_fiber,
        "no lost updates",
        fibers * per_fiber,
        total
    );
    test_complete!("concurrent_increments_are_atomic", total = total);
}

#[test]
fn transfers_conserve_the_total() {
    init_test("transfers_conserve_the_total");
    let runtime = live_runtime();
    let accounts = TArray::from_vec(vec![100i64; 8]);

    let transfer = |accounts: TArray<i64>, from: usize, to: usize, amount: i64| -> Effect<(), String> {
        let (a, b) = (accounts.clone(), accounts.clone());
        accounts
            .get::<String>(from)
            .flat_map(move |balance| {
                if balance < amount {
                    Stm::fail(format!("account {from} short"))
                } else {
                    a.update(from, move |v| v - amount)
                        .and_then(b.update(to, move |v| v + amount))
                }
            })
            .commit()
    };

    let moves = (0..200usize).map(|i| {
        transfer(accounts.clone(), i % 8, (i * 3 + 1) % 8, (i % 13) as i64).ignore::<Infallible>()
    });
    runtime.run_sync(collect_all_par(moves)).expect("transfers");

    let sum = runtime
        .run_sync(accounts.fold::<i64, Infallible>(0, |acc, v| acc + v).commit())
        .expect("sum");
    assert_with_log!(sum == 800, "total conserved", 800, sum);
    let balances = accounts.to_vec::<Infallible>();
    let balances = runtime.run_sync(balances.commit()).expect("balances");
    assert!(balances.iter().all(|b| *b >= 0), "{balances:?}");
    test_complete!("transfers_conserve_the_total");
}

#[test]
fn retry_wakes_only_on_relevant_writes() {
    init_test("retry_wakes_only_on_relevant_writes");
    let runtime = live_runtime();
    let watched = TRef::new(0u32);
    let unrelated = TRef::new(0u32);
    let attempts = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&attempts);
    let waiter = watched
        .get::<Infallible>()
        .map(move |v| {
            counted.fetch_add(1, Ordering::SeqCst);
            v
        })
        .flat_map(|v| if v == 0 { Stm::retry() } else { Stm::succeed(v) })
        .commit();
    let handle = runtime.fork(waiter).expect("fork waiter");

    wait_until(Duration::from_secs(5), "waiter registered", || {
        watched.waiters() == 1
    });
    let before = attempts.load(Ordering::SeqCst);

    test_section!("writes to an unrelated ref");
    for i in 1..=5 {
        runtime
            .run_sync(unrelated.set::<Infallible>(i).commit())
            .expect("unrelated write");
    }
    std::thread::sleep(Duration::from_millis(20));
    let after_unrelated = attempts.load(Ordering::SeqCst);
    assert_with_log!(
        after_unrelated == before,
        "no re-run for unrelated writes",
        before,
        after_unrelated
    );

    test_section!("write to the watched ref");
    runtime
        .run_sync(watched.set::<Infallible>(42).commit())
        .expect("watched write");
    let exit = handle.wait();
    assert_eq!(exit.value(), Some(&42));
    assert_eq!(watched.waiters(), 0);
    assert!(attempts.load(Ordering::SeqCst) > before);
    test_complete!("retry_wakes_only_on_relevant_writes");
}

#[test]
fn interrupted_retry_unregisters_its_waiter() {
    init_test("interrupted_retry_unregisters_its_waiter");
    let runtime = live_runtime();
    let ready = TRef::new(false);

    let blocked = ready
        .get::<Infallible>()
        .flat_map(Stm::check)
        .commit();
    let handle = runtime.fork(blocked).expect("fork blocked fiber");
    wait_until(Duration::from_secs(5), "waiter registered", || {
        ready.waiters() == 1
    });

    let exit = runtime
        .run_sync(handle.interrupt::<Infallible>())
        .expect("interrupt");
    assert!(exit.is_interrupted(), "{exit:?}");
    let left = ready.waiters();
    assert_with_log!(left == 0, "waiter removed on interrupt", 0, left);

    test_section!("a later write finds nobody to wake");
    runtime
        .run_sync(ready.set::<Infallible>(true).commit())
        .expect("write");
    assert_eq!(ready.waiters(), 0);
    test_complete!("interrupted_retry_unregisters_its_waiter");
}

#[test]
fn or_else_rolls_back_the_retried_branch() {
    init_test("or_else_rolls_back_the_retried_branch");
    let runtime = live_runtime();
    let cell = TRef::new(1u32);

    let first = cell.set::<Infallible>(99).and_then(Stm::retry());
    let second = cell.get::<Infallible>();
    let seen = runtime
        .run_sync(first.or_else(second).commit())
        .expect("or_else");
    assert_with_log!(seen == 1, "first branch's write rolled back", 1, seen);
    assert_eq!(cell.peek(), 1);

    let check = Stm::<(), Infallible>::check(true).and_then(cell.get());
    assert_eq!(runtime.run_sync(check.commit()), Ok(1));
    test_complete!("or_else_rolls_back_the_retried_branch");
}

#[test]
fn failures_publish_but_defects_discard() {
    init_test("failures_publish_but_defects_discard");
    let runtime = live_runtime();
    let cell = TRef::new(0u32);

    let failing = cell
        .set::<String>(5)
        .and_then(Stm::<(), String>::fail("rejected".into()));
    let exit = runtime.run_sync_exit(failing.commit());
    assert_eq!(exit.cause().and_then(|c| c.first_failure()).map(String::as_str), Some("rejected"));
    assert_with_log!(cell.peek() == 5, "typed failure commits writes", 5, cell.peek());

    let dying = cell
        .set::<String>(7)
        .and_then(Stm::<(), String>::die("corrupt"));
    let exit = runtime.run_sync_exit(dying.commit());
    assert!(exit.cause().is_some_and(fibril::Cause::is_die));
    assert_with_log!(cell.peek() == 5, "defect discards writes", 5, cell.peek());

    let recovered = cell
        .set::<String>(9)
        .and_then(Stm::<u32, String>::fail("x".into()))
        .catch_all(|_| Stm::<u32, Infallible>::succeed(0));
    assert_eq!(runtime.run_sync(recovered.commit()), Ok(0));
    test_complete!("failures_publish_but_defects_discard");
}

#[test]
fn bounded_queue_hands_items_between_fibers() {
    init_test("bounded_queue_hands_items_between_fibers");
    let runtime = live_runtime();
    let queue: TQueue<u32> = TQueue::new_bounded(2);

    let q = queue.clone();
    let producer = Effect::collect_all((1..=20).map(move |i| q.offer::<Infallible>(i).commit()));
    let q = queue.clone();
    let consumer = Effect::collect_all((1..=20).map(move |_| q.take::<Infallible>().commit()));

    let (_, taken) = runtime
        .run_sync(producer.zip_par(consumer))
        .expect("queue transfer");
    assert_with_log!(
        taken == (1..=20).collect::<Vec<_>>(),
        "FIFO order across fibers",
        "1..=20",
        taken
    );
    assert!(runtime.run_sync(queue.is_empty::<Infallible>().commit()).expect("empty"));
    test_complete!("bounded_queue_hands_items_between_fibers");
}
