//! Fibers and the run loop.
//!
//! A fiber interprets an [`Op`] tree with an explicit continuation stack, so
//! deep effect chains never grow the host stack. Outside threads talk to a
//! fiber only through its inbox; whoever wins the `running` flag drains the
//! inbox and drives the fiber on a worker until it suspends, yields or
//! finishes.
//!
//! # Interruption
//!
//! An interrupt is recorded in the fiber's pending cause. At the next safe
//! point, if the fiber is interruptible, the current instruction is replaced
//! with a failure carrying that cause. While unwinding, failure handlers are
//! skipped unless they were pushed inside an uninterruptible region, which
//! is how finalizers still run.

use crate::effect::op::{erase, AnyCause, Cont, ErasedExit, FailCont, Op};
use crate::effect::AnyEffect;
use crate::fiber_ref::FiberRefs;
use crate::runtime::RuntimeInner;
use crate::tracing_compat::{debug, trace};
use crate::types::{Cause, Defect, Exit, FiberId};
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Scheduling state of a fiber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FiberStatus {
    /// Queued or executing on a worker.
    Running,
    /// Waiting for an async completion.
    Suspended {
        /// Fiber being waited for, or `FiberId::None`.
        blocking_on: FiberId,
        /// Whether an interrupt would cancel the wait.
        interruptible: bool,
    },
    /// Finished; the exit is final.
    Done,
}

impl FiberStatus {
    /// Returns `true` for [`FiberStatus::Done`].
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns `true` for [`FiberStatus::Suspended`].
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

pub(crate) enum FiberMessage {
    Resume { epoch: u64, op: Op },
    Interrupt(AnyCause),
}

enum Frame {
    OnSuccess(Cont),
    Fold(FailCont, Cont),
    RestoreInterruptibility(bool),
}

struct Suspension {
    epoch: u64,
    canceler: Option<Op>,
}

struct FiberContext {
    current: Option<Op>,
    stack: Vec<Frame>,
    interruptible: bool,
    interrupted: AnyCause,
    refs: FiberRefs,
    suspension: Option<Suspension>,
    epoch: u64,
    children_reaped: bool,
    done: bool,
}

type Observer = Box<dyn FnOnce(&ErasedExit) + Send>;

#[derive(Default)]
struct Completion {
    exit: Option<ErasedExit>,
    refs: Option<FiberRefs>,
    observers: Vec<(u64, Observer)>,
    next_observer: u64,
}

enum Outcome {
    Suspended,
    Yielded,
    Idle,
    Done(ErasedExit, FiberRefs),
}

/// What an instruction sees of the fiber running it.
pub(crate) struct FiberScope<'a> {
    pub(crate) fiber: &'a Arc<Fiber>,
    pub(crate) refs: &'a mut FiberRefs,
    pub(crate) interruptible: bool,
}

/// Resumes one specific suspension of a fiber.
///
/// Resumers are single-shot in effect: the fiber ignores any resume whose
/// epoch is not the one it is currently suspended on.
#[derive(Clone)]
pub(crate) struct Resumer {
    fiber: Arc<Fiber>,
    epoch: u64,
}

impl Resumer {
    pub(crate) fn resume(&self, op: Op) {
        self.fiber.tell(FiberMessage::Resume {
            epoch: self.epoch,
            op,
        });
    }
}

/// A fiber passed around as a value, before it gets a typed handle.
#[derive(Clone)]
pub(crate) struct RawFiber(pub(crate) Arc<Fiber>);

pub(crate) struct Fiber {
    id: FiberId,
    runtime: Arc<RuntimeInner>,
    parent: Option<Weak<Fiber>>,
    inbox: SegQueue<FiberMessage>,
    running: AtomicBool,
    context: Mutex<FiberContext>,
    status: Mutex<FiberStatus>,
    completion: Mutex<Completion>,
    children: Mutex<BTreeMap<FiberId, Arc<Fiber>>>,
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("status", &*self.status.lock())
            .finish_non_exhaustive()
    }
}

impl Fiber {
    pub(crate) fn new(
        runtime: Arc<RuntimeInner>,
        id: FiberId,
        parent: Option<Weak<Self>>,
        refs: FiberRefs,
        interruptible: bool,
        op: Op,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            runtime,
            parent,
            inbox: SegQueue::new(),
            running: AtomicBool::new(false),
            context: Mutex::new(FiberContext {
                current: Some(op),
                stack: Vec::new(),
                interruptible,
                interrupted: Cause::Empty,
                refs,
                suspension: None,
                epoch: 0,
                children_reaped: false,
                done: false,
            }),
            status: Mutex::new(FiberStatus::Running),
            completion: Mutex::new(Completion::default()),
            children: Mutex::new(BTreeMap::new()),
        })
    }

    pub(crate) fn id(&self) -> &FiberId {
        &self.id
    }

    pub(crate) fn runtime(&self) -> &Arc<RuntimeInner> {
        &self.runtime
    }

    pub(crate) fn parent_id(&self) -> Option<FiberId> {
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|p| p.id.clone())
    }

    pub(crate) fn status(&self) -> FiberStatus {
        self.status.lock().clone()
    }

    /// Suspended, idle and with nothing waiting in the inbox.
    pub(crate) fn is_quiescent(&self) -> bool {
        self.status.lock().is_suspended()
            && !self.running.load(Ordering::Acquire)
            && self.inbox.is_empty()
    }

    pub(crate) fn children(&self) -> Vec<Arc<Self>> {
        self.children.lock().values().cloned().collect()
    }

    pub(crate) fn exit(&self) -> Option<ErasedExit> {
        self.completion.lock().exit.clone()
    }

    pub(crate) fn final_refs(&self) -> Option<FiberRefs> {
        self.completion.lock().refs.clone()
    }

    /// Hands the fiber to the scheduler for the first time.
    pub(crate) fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::Release);
        self.runtime.scheduler().submit(Arc::clone(self));
    }

    pub(crate) fn tell(self: &Arc<Self>, message: FiberMessage) {
        self.inbox.push(message);
        self.try_schedule();
    }

    pub(crate) fn interrupt_as(self: &Arc<Self>, by: FiberId) {
        self.tell(FiberMessage::Interrupt(Cause::Interrupt(by)));
    }

    fn try_schedule(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.runtime.scheduler().submit(Arc::clone(self));
        }
    }

    /// Registers `observer` for the exit; runs it at once if already done.
    ///
    /// Returns a key for [`Fiber::unobserve`] while the fiber is running.
    pub(crate) fn observe(&self, observer: impl FnOnce(&ErasedExit) + Send + 'static) -> Option<u64> {
        let mut completion = self.completion.lock();
        let finished = completion.exit.clone();
        if let Some(exit) = finished {
            drop(completion);
            observer(&exit);
            return None;
        }
        let key = completion.next_observer;
        completion.next_observer += 1;
        completion.observers.push((key, Box::new(observer)));
        Some(key)
    }

    pub(crate) fn unobserve(&self, key: u64) {
        self.completion.lock().observers.retain(|(k, _)| *k != key);
    }

    /// Drives the fiber on the calling worker. Only the holder of the
    /// `running` flag calls this.
    pub(crate) fn run(self: &Arc<Self>) {
        let outcome = {
            let mut ctx = self.context.lock();
            if ctx.done {
                Outcome::Idle
            } else {
                self.drain_inbox(&mut ctx);
                if ctx.current.is_some() {
                    self.evaluate(&mut ctx)
                } else {
                    Outcome::Idle
                }
            }
        };
        match outcome {
            Outcome::Yielded => self.runtime.scheduler().submit(Arc::clone(self)),
            Outcome::Suspended | Outcome::Idle => {
                self.running.store(false, Ordering::Release);
                if !self.inbox.is_empty() {
                    self.try_schedule();
                }
            }
            Outcome::Done(exit, refs) => {
                self.running.store(false, Ordering::Release);
                self.complete(exit, refs);
            }
        }
    }

    fn drain_inbox(self: &Arc<Self>, ctx: &mut FiberContext) {
        while let Some(message) = self.inbox.pop() {
            match message {
                FiberMessage::Resume { epoch, op } => {
                    if ctx.suspension.as_ref().is_some_and(|s| s.epoch == epoch) {
                        ctx.suspension = None;
                        ctx.current = Some(op);
                        *self.status.lock() = FiberStatus::Running;
                        self.runtime.supervisor().on_resume(&self.id);
                    }
                }
                FiberMessage::Interrupt(cause) => {
                    trace!(fiber = %self.id, "interrupt requested");
                    ctx.interrupted = std::mem::take(&mut ctx.interrupted).both(cause);
                    if ctx.interruptible {
                        if let Some(suspension) = ctx.suspension.take() {
                            let cause = ctx.interrupted.clone();
                            ctx.current = Some(match suspension.canceler {
                                None => Op::Fail(cause),
                                Some(canceler) => {
                                    // The canceler must not be cut short at the next safe point.
                                    ctx.stack.push(Frame::RestoreInterruptibility(true));
                                    ctx.interruptible = false;
                                    cancel_then_fail(canceler, cause)
                                }
                            });
                            *self.status.lock() = FiberStatus::Running;
                            self.runtime.supervisor().on_resume(&self.id);
                        }
                    }
                }
            }
        }
    }

    fn evaluate(self: &Arc<Self>, ctx: &mut FiberContext) -> Outcome {
        let budget = self.runtime.config().yield_budget.max(1);
        let Some(mut cur) = ctx.current.take() else {
            return Outcome::Idle;
        };
        let mut steps = 0usize;
        loop {
            if !self.inbox.is_empty() {
                self.drain_inbox(ctx);
            }
            if ctx.interruptible && !ctx.interrupted.is_empty() {
                cur = match cur {
                    Op::Fail(cause)
                        if cause
                            .interruptors()
                            .is_superset(&ctx.interrupted.interruptors()) =>
                    {
                        Op::Fail(cause)
                    }
                    Op::Fail(cause) => Op::Fail(cause.then(ctx.interrupted.clone())),
                    _ => Op::Fail(ctx.interrupted.clone()),
                };
            }
            steps += 1;
            if steps > budget {
                ctx.current = Some(cur);
                return Outcome::Yielded;
            }
            cur = match cur {
                Op::Succeed(value) => match ctx.stack.pop() {
                    None => match self.finish(ctx, Exit::Success(value)) {
                        Ok(next) => next,
                        Err(outcome) => return outcome,
                    },
                    Some(Frame::OnSuccess(k) | Frame::Fold(_, k)) => guarded(|| k(value)),
                    Some(Frame::RestoreInterruptibility(flag)) => {
                        ctx.interruptible = flag;
                        Op::Succeed(value)
                    }
                },
                Op::Fail(cause) => match ctx.stack.pop() {
                    None => match self.finish(ctx, Exit::Failure(cause)) {
                        Ok(next) => next,
                        Err(outcome) => return outcome,
                    },
                    Some(Frame::OnSuccess(_)) => Op::Fail(cause),
                    Some(Frame::Fold(handler, _)) => {
                        if ctx.interruptible && !ctx.interrupted.is_empty() {
                            Op::Fail(cause)
                        } else {
                            guarded(|| handler(cause))
                        }
                    }
                    Some(Frame::RestoreInterruptibility(flag)) => {
                        ctx.interruptible = flag;
                        Op::Fail(cause)
                    }
                },
                Op::Sync(thunk) => match catch_unwind(AssertUnwindSafe(|| thunk())) {
                    Ok(Ok(value)) => Op::Succeed(value),
                    Ok(Err(cause)) => Op::Fail(cause),
                    Err(payload) => Op::Fail(Cause::Die(Defect::from_panic(&*payload))),
                },
                Op::Suspend(thunk) => guarded(|| thunk()),
                Op::FlatMap(inner, k) => {
                    ctx.stack.push(Frame::OnSuccess(k));
                    (*inner).clone()
                }
                Op::Fold(inner, on_failure, on_success) => {
                    ctx.stack.push(Frame::Fold(on_failure, on_success));
                    (*inner).clone()
                }
                Op::SetInterruptible(inner, flag) => {
                    if flag != ctx.interruptible {
                        ctx.stack
                            .push(Frame::RestoreInterruptibility(ctx.interruptible));
                        ctx.interruptible = flag;
                    }
                    (*inner).clone()
                }
                Op::WithFiber(f) => {
                    let mut scope = FiberScope {
                        fiber: self,
                        refs: &mut ctx.refs,
                        interruptible: ctx.interruptible,
                    };
                    guarded(|| f(&mut scope))
                }
                Op::Fork { effect, daemon } => {
                    let child = self.spawn_child(ctx, (*effect).clone(), daemon);
                    Op::Succeed(erase(RawFiber(child)))
                }
                Op::Async {
                    register,
                    blocking_on,
                } => {
                    ctx.epoch += 1;
                    let epoch = ctx.epoch;
                    let resumer = Resumer {
                        fiber: Arc::clone(self),
                        epoch,
                    };
                    match catch_unwind(AssertUnwindSafe(|| register(resumer))) {
                        Ok(canceler) => {
                            ctx.suspension = Some(Suspension { epoch, canceler });
                            *self.status.lock() = FiberStatus::Suspended {
                                blocking_on,
                                interruptible: ctx.interruptible,
                            };
                            self.runtime.supervisor().on_suspend(&self.id);
                            return Outcome::Suspended;
                        }
                        Err(payload) => Op::Fail(Cause::Die(Defect::from_panic(&*payload))),
                    }
                }
                Op::Yield => {
                    ctx.current = Some(Op::unit());
                    return Outcome::Yielded;
                }
            };
        }
    }

    /// Called when the stack is empty. The first time, supervised children
    /// are interrupted and awaited before the exit becomes final.
    fn finish(&self, ctx: &mut FiberContext, exit: ErasedExit) -> Result<Op, Outcome> {
        if !ctx.children_reaped {
            ctx.children_reaped = true;
            let children = self.children();
            if !children.is_empty() {
                debug!(fiber = %self.id, children = children.len(), "reaping children");
                ctx.interruptible = false;
                let terminal = Op::from_exit(&exit);
                return Ok(interrupt_all(children, self.id.clone())
                    .flat_map(move |_| terminal.clone()));
            }
        }
        ctx.done = true;
        ctx.suspension = None;
        Err(Outcome::Done(exit, std::mem::take(&mut ctx.refs)))
    }

    fn spawn_child(self: &Arc<Self>, ctx: &FiberContext, op: Op, daemon: bool) -> Arc<Self> {
        let runtime = &self.runtime;
        let child_id = FiberId::new(runtime.clock().current_time_millis());
        let refs = ctx.refs.fork_as(&child_id, runtime.fiber_refs());
        let parent = if daemon {
            None
        } else {
            Some(Arc::downgrade(self))
        };
        let started = AnyEffect::from_op(op.clone());
        let child = Self::new(
            Arc::clone(runtime),
            child_id,
            parent,
            refs,
            ctx.interruptible,
            op,
        );
        runtime
            .supervisor()
            .on_start(&ctx.refs, &started, Some(&self.id), &child.id);
        if !daemon {
            self.children
                .lock()
                .insert(child.id.clone(), Arc::clone(&child));
        }
        runtime.register(Arc::clone(&child));
        trace!(parent = %self.id, child = %child.id, daemon, "fiber forked");
        child.start();
        child
    }

    fn complete(self: &Arc<Self>, exit: ErasedExit, refs: FiberRefs) {
        *self.status.lock() = FiberStatus::Done;
        let observers = {
            let mut completion = self.completion.lock();
            completion.exit = Some(exit.clone());
            completion.refs = Some(refs);
            std::mem::take(&mut completion.observers)
        };
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.children.lock().remove(&self.id);
        }
        self.runtime.supervisor().on_end(&exit, &self.id);
        self.runtime.unregister(&self.id);
        debug!(
            fiber = %self.id,
            success = exit.is_success(),
            interrupted = exit.is_interrupted(),
            "fiber done"
        );
        for (_, observer) in observers {
            observer(&exit);
        }
    }
}

/// Calls a user continuation, turning a panic into a defect.
fn guarded(f: impl FnOnce() -> Op) -> Op {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Op::Fail(Cause::Die(Defect::from_panic(&*payload))))
}

/// Runs a canceler, ignoring its outcome, then fails with `cause`.
///
/// The caller turns interruptibility off around it.
fn cancel_then_fail(canceler: Op, cause: AnyCause) -> Op {
    let on_failure = cause.clone();
    Op::Fold(
        Arc::new(canceler),
        Arc::new(move |_| Op::Fail(on_failure.clone())),
        Arc::new(move |_| Op::Fail(cause.clone())),
    )
}

/// Interrupts `fibers` on behalf of `by` and suspends until all are done.
pub(crate) fn interrupt_all(fibers: Vec<Arc<Fiber>>, by: FiberId) -> Op {
    Op::async_op(FiberId::None, move |resumer| {
        let remaining = Arc::new(AtomicUsize::new(fibers.len()));
        if fibers.is_empty() {
            resumer.resume(Op::unit());
            return None;
        }
        for fiber in &fibers {
            fiber.interrupt_as(by.clone());
            let remaining = Arc::clone(&remaining);
            let resumer = resumer.clone();
            fiber.observe(move |_| {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    resumer.resume(Op::unit());
                }
            });
        }
        None
    })
}

/// Suspends until every fiber is done, or until one of them fails.
///
/// Resumes with `true` when a failure cut the wait short.
pub(crate) fn await_all_or_failure(fibers: Vec<Arc<Fiber>>) -> Op {
    Op::async_op(FiberId::None, move |resumer| {
        if fibers.is_empty() {
            resumer.resume(Op::Succeed(erase(false)));
            return None;
        }
        let remaining = Arc::new(AtomicUsize::new(fibers.len()));
        let mut keys = Vec::with_capacity(fibers.len());
        for fiber in &fibers {
            let remaining = Arc::clone(&remaining);
            let resumer = resumer.clone();
            let key = fiber.observe(move |exit: &ErasedExit| {
                if !exit.is_success() {
                    resumer.resume(Op::Succeed(erase(true)));
                } else if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    resumer.resume(Op::Succeed(erase(false)));
                }
            });
            keys.push((Arc::clone(fiber), key));
        }
        Some(unobserve_all(keys))
    })
}

/// Suspends until any fiber is done; resumes with its index.
pub(crate) fn await_first(fibers: Vec<Arc<Fiber>>) -> Op {
    Op::async_op(FiberId::None, move |resumer| {
        let mut keys = Vec::with_capacity(fibers.len());
        for (index, fiber) in fibers.iter().enumerate() {
            let resumer = resumer.clone();
            let key = fiber.observe(move |_| resumer.resume(Op::Succeed(erase(index))));
            keys.push((Arc::clone(fiber), key));
        }
        Some(unobserve_all(keys))
    })
}

fn unobserve_all(keys: Vec<(Arc<Fiber>, Option<u64>)>) -> Op {
    Op::sync(move || {
        for (fiber, key) in &keys {
            if let Some(key) = key {
                fiber.unobserve(*key);
            }
        }
        Ok(erase(()))
    })
}
