//! Single-assignment results and the suspension primitive behind them.

use std::cell::UnsafeCell;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use static_assertions::assert_impl_all;

use crate::error::TaskError;
use crate::operation::{self, OpId, Operation, Transition};
use crate::scheduler::Lane;

/// Binds a waiting predicate to the operation running at construction time.
pub struct ConditionVariable {
    caller: Weak<Operation>,
}

impl ConditionVariable {
    pub fn new() -> ConditionVariable {
        let caller = match operation::try_current() {
            Some(op) => Arc::downgrade(&op),
            None => Weak::new(),
        };
        ConditionVariable { caller }
    }

    /// Suspends the bound operation's fiber until `pred` holds.
    pub fn wait(&self, mut pred: impl FnMut() -> bool) {
        while !pred() {
            let caller = self.caller.upgrade().expect("condition variable: no bound operation");
            caller.suspend(false);
        }
    }

    /// Re-enqueues the bound operation onto its scheduler's work lane.
    ///
    /// No-op if the operation has been destroyed; a condition variable holds a
    /// non-owning back-reference and never extends the operation's lifetime.
    pub fn notify(&self) {
        if let Some(caller) = self.caller.upgrade() {
            if let Some(scheduler) = caller.scheduler() {
                scheduler.enqueue_operation(caller, Lane::Work);
            }
        }
    }
}

impl Default for ConditionVariable {
    fn default() -> Self {
        ConditionVariable::new()
    }
}

/// Write-once result slot of a posted operation.
///
/// Awaiting suspends the calling fiber, never its worker thread. The slot is
/// set exactly once by whichever worker completes the callee; reading after
/// availability is idempotent, including error re-raise.
pub struct Future<T: Send + 'static> {
    callee: OpId,
    available: AtomicBool,
    slot: UnsafeCell<Option<Result<T, TaskError>>>,
    cv: ConditionVariable,
}

unsafe impl<T: Send + 'static> Send for Future<T> {}
unsafe impl<T: Send + 'static> Sync for Future<T> {}

assert_impl_all!(Future<()>: Send, Sync);

impl<T: Send + 'static> Future<T> {
    pub(crate) fn new(callee: OpId) -> Future<T> {
        Future {
            callee,
            available: AtomicBool::new(false),
            slot: UnsafeCell::new(None),
            cv: ConditionVariable::new(),
        }
    }

    /// Id of the operation this future represents.
    pub fn callee(&self) -> &OpId {
        &self.callee
    }

    pub fn is_ready(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Waits for the result and returns a reference to the value.
    ///
    /// A stored error is re-raised on every call.
    pub fn val(&self) -> &T {
        match self.result() {
            Ok(value) => value,
            Err(err) => panic::panic_any(err),
        }
    }

    /// Waits for the result, suspending the calling fiber while it is pending.
    pub fn result(&self) -> Result<&T, TaskError> {
        if !self.is_ready() {
            let op = operation::current();
            op.on_transition(Transition::Suspend, Some(&self.callee));
            self.cv.wait(|| self.available.load(Ordering::Acquire));
            op.on_transition(Transition::Resume, None);
        }
        match unsafe { &*self.slot.get() } {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(err.clone()),
            None => unreachable!("future available without result"),
        }
    }

    /// Stores the value and notifies the awaiting operation.
    pub fn set(&self, value: T) {
        self.complete(Ok(value));
    }

    /// Stores an error; awaiting re-raises it.
    pub fn fail(&self, err: TaskError) {
        self.complete(Err(err));
    }

    fn complete(&self, result: Result<T, TaskError>) {
        assert!(!self.is_ready(), "future set twice");
        unsafe { *self.slot.get() = Some(result) };
        self.available.store(true, Ordering::Release);
        self.cv.notify();
    }

    /// Extracts the result after the runtime drained and all other holders
    /// released the future.
    ///
    /// # Panics
    /// Panic if the callee never completed or the future is still shared.
    pub fn into_result(self: Arc<Self>) -> Result<T, TaskError> {
        assert!(self.is_ready(), "future not completed");
        let future = Arc::try_unwrap(self).ok().expect("future still shared");
        future.slot.into_inner().expect("future available without result")
    }
}

/// Awaits every future and returns the first error encountered, if any.
pub fn await_all<T: Send + 'static>(futures: &[Arc<Future<T>>]) -> Result<(), TaskError> {
    let mut first = None;
    for future in futures {
        if let Err(err) = future.result() {
            first.get_or_insert(err);
        }
    }
    match first {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn future_of<T: Send + 'static>() -> Arc<Future<T>> {
        Arc::new(Future::new(OpId::new("callee", "future.rs")))
    }

    #[test]
    fn ready_future_reads_without_suspension() {
        let future = future_of::<i32>();
        future.set(5);
        assert_eq!(*future.val(), 5);
        assert_eq!(*future.val(), 5);
    }

    #[test]
    #[should_panic(expected = "future set twice")]
    fn future_set_twice() {
        let future = future_of::<i32>();
        future.set(1);
        future.set(2);
    }

    #[test]
    fn failed_future_errors_every_read() {
        let future = future_of::<i32>();
        future.fail(TaskError::new(Box::new("broken")));
        assert_eq!(future.result().unwrap_err().to_string(), "panic(\"broken\")");
        assert_eq!(future.result().unwrap_err().to_string(), "panic(\"broken\")");
    }

    #[test]
    fn future_into_result() {
        let future = future_of::<i32>();
        future.set(42);
        assert_eq!(future.into_result().unwrap(), 42);
    }

    #[test]
    #[should_panic(expected = "future not completed")]
    fn future_into_result_incomplete() {
        let future = future_of::<i32>();
        let _ = future.into_result();
    }
}
