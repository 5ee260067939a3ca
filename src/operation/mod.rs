//! Suspendable operations backed by stackful fibers.

mod context;
pub(crate) mod stack;

use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use strum::Display;

use self::context::{Context, Entry};
pub use self::stack::StackSize;
use self::stack::{Stack, StackPool};
use crate::error::TaskError;
use crate::scheduler::{Lane, Scheduler};

thread_local! {
    static OPERATION: RefCell<Option<Arc<Operation>>> = RefCell::new(None);
}

pub(crate) fn try_current() -> Option<Arc<Operation>> {
    OPERATION.with(|cell| cell.borrow().clone())
}

pub(crate) fn current() -> Arc<Operation> {
    try_current().expect("no running operation")
}

struct Scope;

impl Scope {
    fn enter(op: &Arc<Operation>) -> Scope {
        OPERATION.with(|cell| {
            let mut cell = cell.borrow_mut();
            assert!(cell.is_none(), "running operation not exited");
            *cell = Some(op.clone());
        });
        Scope
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        OPERATION.with(|cell| {
            cell.borrow_mut().take().expect("no running operation");
        });
    }
}

/// Identity of one submitted operation.
///
/// Equality, ordering and hashing all key on the scheduler-assigned `index`;
/// `name` and `created_at` exist for diagnostics only.
#[derive(Clone, Debug)]
pub struct OpId {
    pub name: String,
    pub created_at: &'static str,
    pub parent: u64,
    pub index: u64,
}

impl OpId {
    pub fn new(name: impl Into<String>, created_at: &'static str) -> OpId {
        OpId { name: name.into(), created_at, parent: 0, index: 0 }
    }

    pub fn with_parent(name: impl Into<String>, created_at: &'static str, parent: u64) -> OpId {
        OpId { name: name.into(), created_at, parent, index: 0 }
    }
}

impl PartialEq for OpId {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for OpId {}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl Hash for OpId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} [{}]", self.index, self.name, self.created_at)
    }
}

/// Lifecycle notification delivered to an operation's [Probe].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Transition {
    Activate,
    Deactivate,
    Enqueue,
    Resume,
    Suspend,
    Finish,
}

/// Capability to observe operation lifecycle transitions.
///
/// Implementations receive the id of the transitioning operation and, for
/// [Transition::Suspend], the id of the awaited callee. The default
/// implementation ignores every notification; `()` is the no-op payload.
pub trait Probe {
    fn transition(&self, _transition: Transition, _id: &OpId, _callee: Option<&OpId>) {}
}

impl Probe for () {}

#[derive(Default)]
struct State {
    running: bool,
    reschedule: bool,
    finished: bool,
}

/// One suspendable computation with its own fiber stack.
///
/// An operation is shared by every party that may still have to resume it: a
/// runner queue, an access wait queue, or the operation's own suspended stack.
/// It is destroyed when the last holder releases it after the fiber finished.
pub(crate) struct Operation {
    id: OpId,
    lane: Lane,
    probe: Box<dyn Probe + Send + Sync>,
    scheduler: Weak<Scheduler>,
    stacks: Arc<StackPool>,
    body: UnsafeCell<Option<Box<dyn FnOnce() + Send>>>,
    state: Mutex<State>,
    finishing: Cell<bool>,
    stack: UnsafeCell<Option<Stack>>,
    fiber: UnsafeCell<Option<Box<Context>>>,
    main: UnsafeCell<Context>,
    self_ref: Weak<Operation>,
}

unsafe impl Send for Operation {}
unsafe impl Sync for Operation {}

impl Operation {
    pub fn new(
        probe: Box<dyn Probe + Send + Sync>,
        body: Box<dyn FnOnce() + Send>,
        id: OpId,
        lane: Lane,
        scheduler: &Arc<Scheduler>,
    ) -> Arc<Operation> {
        Arc::new_cyclic(|self_ref| Operation {
            id,
            lane,
            probe,
            scheduler: Arc::downgrade(scheduler),
            stacks: scheduler.stacks().clone(),
            body: UnsafeCell::new(Some(body)),
            state: Mutex::new(State::default()),
            finishing: Cell::new(false),
            stack: UnsafeCell::new(None),
            fiber: UnsafeCell::new(None),
            main: UnsafeCell::new(Context::empty()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn id(&self) -> &OpId {
        &self.id
    }

    pub fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler.upgrade()
    }

    pub fn on_transition(&self, transition: Transition, callee: Option<&OpId>) {
        self.probe.transition(transition, &self.id, callee);
    }

    /// Activates the fiber from its last suspension point.
    ///
    /// Exactly one thread may be inside the fiber stack at a time. A resume
    /// that loses that race records its intent in `reschedule`, which the
    /// winning activation converts into exactly one re-enqueue on its way out.
    pub fn resume(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.finished {
                return;
            }
            if state.running {
                state.reschedule = true;
                return;
            }
            state.running = true;
        }

        if unsafe { &*self.stack.get() }.is_none() {
            self.init();
        }

        self.on_transition(Transition::Activate, None);
        {
            let _scope = Scope::enter(self);
            let fiber = unsafe { (*self.fiber.get()).as_ref().expect("operation context not initialized") };
            fiber.switch(unsafe { &mut *self.main.get() });
        }

        let finished = self.finishing.get();
        let mut state = self.state.lock().unwrap();
        if state.reschedule {
            state.reschedule = false;
            if let Some(scheduler) = self.scheduler.upgrade() {
                scheduler.enqueue_operation(self.clone(), self.lane);
            }
        }
        state.finished = finished;
        state.running = false;
    }

    /// Gives up the worker thread from inside the fiber.
    pub fn suspend(&self, finished: bool) {
        self.on_transition(if finished { Transition::Finish } else { Transition::Deactivate }, None);
        // A suspended fiber keeps itself alive from its own stack; notifiers
        // hold weak references only.
        let _self_ref = if finished { None } else { self.self_ref.upgrade() };
        self.finishing.set(finished);
        let main = unsafe { &*self.main.get() };
        main.switch(unsafe { (*self.fiber.get()).as_mut().expect("operation context not initialized") });
    }

    extern "C" fn main(arg: *mut libc::c_void) {
        let op = unsafe { &*(arg as *const Operation) };
        op.start();
    }

    fn start(&self) {
        let body = unsafe { &mut *self.body.get() }.take().expect("operation without body");
        if let Err(err) = panic::catch_unwind(AssertUnwindSafe(body)) {
            log::error!("operation {} panicked: {}", self.id, TaskError::new(err));
        }
        self.suspend(true);
    }

    fn init(&self) {
        let stack = self.stacks.alloc();
        let entry = Entry { f: Self::main, arg: self as *const Operation as *mut libc::c_void };
        let fiber = Context::new(&entry, &stack);
        unsafe {
            *self.stack.get() = Some(stack);
            *self.fiber.get() = Some(fiber);
        }
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        if let Some(stack) = self.stack.get_mut().take() {
            self.stacks.dealloc(stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn op_id_keys_on_index() {
        let mut first = OpId::new("first", "here");
        let mut second = OpId::new("second", "there");
        first.index = 7;
        second.index = 7;
        assert_eq!(first, second);

        second.index = 8;
        assert!(first < second);
    }

    #[test]
    fn op_id_display() {
        let mut id = OpId::new("fib", "demo.rs:1");
        id.index = 3;
        assert_eq!(id.to_string(), "3:fib [demo.rs:1]");
    }
}
