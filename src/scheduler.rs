//! Submission surface: identities, lanes and the worker pool entry point.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use ignore_result::Ignore;
use static_assertions::assert_impl_all;

use crate::error::TaskError;
use crate::future::Future;
use crate::operation::stack::StackPool;
use crate::operation::{self, OpId, Operation, Probe, StackSize, Transition};
use crate::runner::Runner;

/// Dispatch class of a submitted operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Lane {
    /// Reactor-driven queue, serviced one item at a time in submission order.
    Io,
    /// CPU-bound structure, drained newest-first ahead of the reactor queue.
    Work,
}

/// Assigns operation identities and routes ready operations to worker threads.
pub struct Scheduler {
    next_index: AtomicU64,
    stacks: Arc<StackPool>,
    runner: Arc<Runner>,
}

assert_impl_all!(Scheduler: Send, Sync);

impl Scheduler {
    pub fn new() -> Arc<Scheduler> {
        Scheduler::with_stack_size(StackSize::default())
    }

    /// Constructs a scheduler whose fibers run on stacks of the given size.
    pub fn with_stack_size(stack_size: StackSize) -> Arc<Scheduler> {
        Arc::new(Scheduler {
            next_index: AtomicU64::new(0),
            stacks: Arc::new(StackPool::new(stack_size)),
            runner: Runner::new(),
        })
    }

    pub(crate) fn stacks(&self) -> &Arc<StackPool> {
        &self.stacks
    }

    fn next_index(&self) -> u64 {
        self.next_index.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Serves queued operations on `threads` workers, blocking the calling
    /// thread until the pool drains or [Scheduler::stop] takes effect.
    ///
    /// Workers exit once both queues are empty and no operation is mid
    /// activation; operations left suspended with nobody to notify them are
    /// abandoned. Calling `run` again resumes service for new submissions.
    pub fn run(&self, threads: usize) {
        assert!(threads > 0, "thread count must not be zero");
        self.runner.reset();
        let workers: Vec<_> = (0..threads)
            .map(|_| {
                let runner = self.runner.clone();
                thread::spawn(move || runner.serve())
            })
            .collect();
        for worker in workers {
            worker.join().ignore();
        }
    }

    /// Lets workers exit once both queues are drained.
    pub fn stop(&self) {
        self.runner.stop();
    }

    /// Wraps `f` into an operation plus a future receiving its result, or the
    /// panic it raised, and enqueues it on `lane`.
    pub fn post<P, F, T>(self: &Arc<Self>, probe: P, f: F, id: OpId, lane: Lane) -> Arc<Future<T>>
    where
        P: Probe + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut id = id;
        id.index = self.next_index();
        let future = Arc::new(Future::new(id.clone()));
        let result = future.clone();
        let body = move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => result.set(value),
            Err(err) => result.fail(TaskError::new(err)),
        };
        let op = Operation::new(Box::new(probe), Box::new(body), id, lane, self);
        self.enqueue_operation(op, lane);
        future
    }

    pub fn post_io<P, F, T>(self: &Arc<Self>, probe: P, f: F, id: OpId) -> Arc<Future<T>>
    where
        P: Probe + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.post(probe, f, id, Lane::Io)
    }

    pub fn post_work<P, F, T>(self: &Arc<Self>, probe: P, f: F, id: OpId) -> Arc<Future<T>>
    where
        P: Probe + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.post(probe, f, id, Lane::Work)
    }

    /// Submits a bare body with no future attached.
    pub fn enqueue<P, F>(self: &Arc<Self>, probe: P, f: F, mut id: OpId, lane: Lane)
    where
        P: Probe + Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        id.index = self.next_index();
        let op = Operation::new(Box::new(probe), Box::new(f), id, lane, self);
        self.enqueue_operation(op, lane);
    }

    /// Submits a body at the bottom of the work structure; it runs only once
    /// everything else there has drained.
    pub fn enqueue_low<P, F>(self: &Arc<Self>, probe: P, f: F, mut id: OpId)
    where
        P: Probe + Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        id.index = self.next_index();
        let op = Operation::new(Box::new(probe), Box::new(f), id, Lane::Work, self);
        op.on_transition(Transition::Enqueue, None);
        self.runner.push_work_bottom(op);
    }

    pub(crate) fn enqueue_operation(&self, op: Arc<Operation>, lane: Lane) {
        op.on_transition(Transition::Enqueue, None);
        match lane {
            Lane::Io => self.runner.push_reactor(op),
            Lane::Work => self.runner.push_work(op),
        }
    }

    /// Fiber stacks mapped fresh from the system so far.
    pub fn allocated_stacks(&self) -> usize {
        self.stacks.allocated()
    }

    /// Fiber stacks currently recycled in the free list.
    pub fn pooled_stacks(&self) -> usize {
        self.stacks.pooled()
    }
}

/// Posts `f` through the current operation's scheduler onto the work lane,
/// recording the caller as parent of the new operation.
pub fn call<P, F, T>(probe: P, f: F, mut id: OpId) -> Arc<Future<T>>
where
    P: Probe + Send + Sync + 'static,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let op = operation::current();
    id.parent = op.id().index;
    let scheduler = op.scheduler().expect("scheduler already dropped");
    scheduler.post_work(probe, f, id)
}

/// Constructs an [OpId] tagged with the current source location.
#[macro_export]
macro_rules! op_id {
    () => {
        $crate::OpId::new("unknown", concat!(file!(), ":", line!()))
    };
    ($name:expr) => {
        $crate::OpId::new($name, concat!(file!(), ":", line!()))
    };
}

/// Posts a callable through the current operation's scheduler, tagging the new
/// operation with the call site.
#[macro_export]
macro_rules! call {
    ($probe:expr, $f:expr) => {
        $crate::call($probe, $f, $crate::op_id!())
    };
    ($probe:expr, $f:expr, $name:expr) => {
        $crate::call($probe, $f, $crate::op_id!($name))
    };
}
