//! Worker pool draining the prioritized work structure and the reactor queue.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::TaskError;
use crate::operation::Operation;

struct DispatchState {
    // LIFO: most recently pushed runs first; low priority enters at index 0.
    work: Vec<Arc<Operation>>,
    reactor: VecDeque<Arc<Operation>>,
    active: usize,
    stopped: bool,
}

impl DispatchState {
    fn new() -> Self {
        DispatchState {
            work: Vec::with_capacity(256),
            reactor: VecDeque::with_capacity(256),
            active: 0,
            stopped: false,
        }
    }

    fn drained(&self) -> bool {
        self.work.is_empty() && self.reactor.is_empty()
    }
}

pub(crate) struct Runner {
    state: Mutex<DispatchState>,
    waker: Condvar,
}

impl Runner {
    pub fn new() -> Arc<Runner> {
        Arc::new(Runner { state: Mutex::new(DispatchState::new()), waker: Condvar::new() })
    }

    pub fn push_work(&self, op: Arc<Operation>) {
        let mut state = self.state.lock().unwrap();
        state.work.push(op);
        self.waker.notify_one();
    }

    pub fn push_work_bottom(&self, op: Arc<Operation>) {
        let mut state = self.state.lock().unwrap();
        state.work.insert(0, op);
        self.waker.notify_one();
    }

    pub fn push_reactor(&self, op: Arc<Operation>) {
        let mut state = self.state.lock().unwrap();
        state.reactor.push_back(op);
        self.waker.notify_one();
    }

    /// Rejects further blocking waits; workers exit once both queues drain.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.waker.notify_all();
    }

    /// Clears the stop flag so a stopped runner can serve again.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = false;
    }

    /// Worker entry. A panic escaping the dispatch loop is reported and the
    /// loop restarts instead of terminating the pool.
    pub fn serve(&self) {
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch())) {
                Ok(()) => break,
                Err(err) => log::error!("dispatch loop panicked, restarting: {}", TaskError::new(err)),
            }
        }
    }

    fn dispatch(&self) {
        let mut state = self.state.lock().unwrap();
        loop {
            // Fully drain the work structure before servicing one reactor item.
            let next = match state.work.pop() {
                Some(op) => Some(op),
                None => state.reactor.pop_front(),
            };
            if let Some(op) = next {
                state.active += 1;
                drop(state);
                if let Err(err) = panic::catch_unwind(AssertUnwindSafe(|| op.resume())) {
                    log::error!("operation {} dispatch panicked: {}", op.id(), TaskError::new(err));
                }
                state = self.state.lock().unwrap();
                state.active -= 1;
                if state.active == 0 && state.drained() {
                    self.waker.notify_all();
                }
                continue;
            }
            if state.stopped || state.active == 0 {
                return;
            }
            state = self.waker.wait(state).unwrap();
        }
    }
}
