//! Declared-resource admission layered on the scheduler.
//!
//! A submission may declare (resource, level) accesses. The wrapped body only
//! starts once every declared access is granted under single-writer,
//! multiple-reader rules; granted accesses are released when the body returns,
//! whether it returned normally or unwound.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

use crate::future::Future;
use crate::operation::{self, OpId, Operation, Probe};
use crate::scheduler::{Lane, Scheduler};

/// Opaque key identifying a logical shared resource.
pub type ResourceId = u64;

/// Access level declared for one resource.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Access {
    None,
    Read,
    Write,
}

/// One (resource, level) declaration attached to a submitted operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AccessRequest {
    pub resource: ResourceId,
    pub access: Access,
}

impl AccessRequest {
    pub fn read(resource: ResourceId) -> AccessRequest {
        AccessRequest { resource, access: Access::Read }
    }

    pub fn write(resource: ResourceId) -> AccessRequest {
        AccessRequest { resource, access: Access::Write }
    }
}

struct Waiter {
    op: Arc<Operation>,
    lane: Lane,
}

#[derive(Default)]
struct Resource {
    // Open declarations referencing this id, queued waiters included. The
    // entry lives exactly as long as this stays above zero.
    usage: usize,
    readers: usize,
    writers: usize,
    write_queue: VecDeque<Waiter>,
    read_queue: VecDeque<Waiter>,
}

struct Blocked {
    resource: ResourceId,
    writer: bool,
}

#[derive(Default)]
struct AccessState {
    resources: HashMap<ResourceId, Resource>,
    // Levels currently held per active operation, for reentrant admission.
    held: HashMap<u64, HashMap<ResourceId, Access>>,
}

impl AccessState {
    fn held_level(&self, op: u64, resource: ResourceId) -> Access {
        self.held
            .get(&op)
            .and_then(|levels| levels.get(&resource))
            .copied()
            .unwrap_or(Access::None)
    }

    // Walks the declarations in order, granting incrementally. Declarations
    // granted on an earlier pass re-enter through their `has` row as no-ops,
    // which keeps the retry after every wake idempotent. Returns the first
    // declaration that cannot be granted.
    fn admit(&mut self, op: u64, accesses: &[AccessRequest]) -> Option<Blocked> {
        for request in accesses {
            let has = self.held_level(op, request.resource);
            let wants = request.access;
            let resource = self.resources.get_mut(&request.resource).expect("declared resource missing");
            match (has, wants) {
                (Access::Write, _) | (Access::Read, Access::Read) | (_, Access::None) => {},
                (Access::Read, Access::Write) => {
                    if resource.writers == 0 && resource.readers == 1 {
                        resource.readers -= 1;
                        resource.writers += 1;
                        self.held.entry(op).or_default().insert(request.resource, Access::Write);
                    } else {
                        return Some(Blocked { resource: request.resource, writer: true });
                    }
                },
                (Access::None, Access::Read) => {
                    if resource.writers == 0 {
                        resource.readers += 1;
                        self.held.entry(op).or_default().insert(request.resource, Access::Read);
                    } else {
                        return Some(Blocked { resource: request.resource, writer: false });
                    }
                },
                (Access::None, Access::Write) => {
                    if resource.writers == 0 && resource.readers == 0 {
                        resource.writers += 1;
                        self.held.entry(op).or_default().insert(request.resource, Access::Write);
                    } else {
                        return Some(Blocked { resource: request.resource, writer: true });
                    }
                },
            }
        }
        None
    }
}

// Picks one admissible waiter after a slot freed: write queue first, then
// read queue, FIFO within each. While readers remain active the only
// admissible writer is a queued upgrade whose read is the last one left.
fn wake_candidate(
    resource: &mut Resource,
    held: &HashMap<u64, HashMap<ResourceId, Access>>,
    id: ResourceId,
) -> Option<Waiter> {
    if resource.writers > 0 {
        return None;
    }
    if resource.readers == 0 {
        if let Some(waiter) = resource.write_queue.pop_front() {
            return Some(waiter);
        }
        return resource.read_queue.pop_front();
    }
    if resource.readers == 1 {
        let upgrade = resource.write_queue.iter().position(|waiter| {
            held.get(&waiter.op.id().index).and_then(|levels| levels.get(&id)).copied() == Some(Access::Read)
        });
        if let Some(at) = upgrade {
            return resource.write_queue.remove(at);
        }
    }
    resource.read_queue.pop_front()
}

fn effective(mut accesses: Vec<AccessRequest>) -> Vec<AccessRequest> {
    accesses.retain(|request| request.access != Access::None);
    accesses
}

// Releases every declared access when dropped, unwind included.
struct AccessGuard {
    ctrl: Arc<AccessScheduler>,
    accesses: Vec<AccessRequest>,
    op: u64,
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        self.ctrl.release(&self.accesses, self.op);
    }
}

/// Scheduler wrapper enforcing single-writer/multiple-reader admission per
/// declared resource before a submitted body runs.
pub struct AccessScheduler {
    scheduler: Arc<Scheduler>,
    state: Mutex<AccessState>,
}

impl AccessScheduler {
    pub fn new(scheduler: Arc<Scheduler>) -> Arc<AccessScheduler> {
        Arc::new(AccessScheduler { scheduler, state: Mutex::new(AccessState::default()) })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Number of resources currently tracked. Returns to its previous value
    /// once every declaration referencing them has been released.
    pub fn resource_count(&self) -> usize {
        self.state.lock().unwrap().resources.len()
    }

    /// Submits `f`; with a non-empty declaration list the body only starts
    /// once every declared access is granted.
    pub fn enqueue<P, F>(self: &Arc<Self>, probe: P, f: F, id: OpId, lane: Lane, accesses: Vec<AccessRequest>)
    where
        P: Probe + Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        let accesses = effective(accesses);
        if accesses.is_empty() {
            self.scheduler.enqueue(probe, f, id, lane);
            return;
        }
        let ctrl = self.clone();
        self.scheduler.enqueue(
            probe,
            move || {
                let _access = ctrl.acquire(&accesses, lane);
                f()
            },
            id,
            lane,
        );
    }

    /// [AccessScheduler::enqueue] with a future receiving the body's result.
    pub fn post<P, F, T>(
        self: &Arc<Self>,
        probe: P,
        f: F,
        id: OpId,
        lane: Lane,
        accesses: Vec<AccessRequest>,
    ) -> Arc<Future<T>>
    where
        P: Probe + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let accesses = effective(accesses);
        if accesses.is_empty() {
            return self.scheduler.post(probe, f, id, lane);
        }
        let ctrl = self.clone();
        self.scheduler.post(
            probe,
            move || {
                let _access = ctrl.acquire(&accesses, lane);
                f()
            },
            id,
            lane,
        )
    }

    fn acquire(self: &Arc<Self>, accesses: &[AccessRequest], lane: Lane) -> AccessGuard {
        let op = operation::current();
        let index = op.id().index;

        let mut guard = self.state.lock().unwrap();
        for request in accesses {
            guard.resources.entry(request.resource).or_default().usage += 1;
        }

        loop {
            match guard.admit(index, accesses) {
                None => break,
                Some(blocked) => {
                    let waiter = Waiter { op: op.clone(), lane };
                    let resource = guard.resources.get_mut(&blocked.resource).expect("blocked resource missing");
                    if blocked.writer {
                        resource.write_queue.push_back(waiter);
                    } else {
                        resource.read_queue.push_back(waiter);
                    }
                    drop(guard);
                    op.suspend(false);
                    guard = self.state.lock().unwrap();
                },
            }
        }
        drop(guard);

        AccessGuard { ctrl: self.clone(), accesses: accesses.to_vec(), op: index }
    }

    fn release(&self, accesses: &[AccessRequest], op: u64) {
        let mut wakes = Vec::new();
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        for (i, request) in accesses.iter().enumerate() {
            let id = request.resource;
            let resource = state.resources.get_mut(&id).expect("released resource missing");
            resource.usage -= 1;
            if resource.usage == 0 {
                state.resources.remove(&id);
                if let Some(levels) = state.held.get_mut(&op) {
                    levels.remove(&id);
                }
                continue;
            }
            // The operation's hold ends with its last declaration on this resource.
            if accesses[i + 1..].iter().any(|later| later.resource == id) {
                continue;
            }
            let level = state.held.get_mut(&op).and_then(|levels| levels.remove(&id));
            let resource = state.resources.get_mut(&id).expect("released resource missing");
            match level {
                Some(Access::Read) => resource.readers -= 1,
                Some(Access::Write) => resource.writers -= 1,
                _ => {},
            }
            if let Some(waiter) = wake_candidate(resource, &state.held, id) {
                wakes.push(waiter);
            }
        }
        if let Some(levels) = state.held.get(&op) {
            if levels.is_empty() {
                state.held.remove(&op);
            }
        }
        drop(guard);

        for waiter in wakes {
            self.scheduler.enqueue_operation(waiter.op, waiter.lane);
        }
    }
}
