//! Probe implementation recording operation status for diagnostics.

use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use strum::Display;

use crate::operation::{OpId, Probe, Transition};

/// Coarse operation status derived from transition notifications.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Status {
    Ready,
    Running,
    Waiting,
}

/// Records the status of every live operation it is attached to.
///
/// Attach a clone of the `Arc<Tracker>` as the payload of a submission;
/// finished operations drop out of the map.
pub struct Tracker {
    ops: Mutex<HashMap<u64, (String, Status)>>,
}

impl Tracker {
    pub fn new() -> Arc<Tracker> {
        Arc::new(Tracker { ops: Mutex::new(HashMap::new()) })
    }

    /// Statuses of live operations, in no particular order.
    pub fn statuses(&self) -> Vec<(u64, String, Status)> {
        let ops = self.ops.lock().unwrap();
        ops.iter().map(|(index, (name, status))| (*index, name.clone(), *status)).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dumps live operation statuses through the logger.
    pub fn log_status(&self) {
        for (index, name, status) in self.statuses() {
            log::debug!("{}\t{}\t{}", index, name, status);
        }
    }
}

impl Probe for Arc<Tracker> {
    fn transition(&self, transition: Transition, id: &OpId, _callee: Option<&OpId>) {
        let mut ops = self.ops.lock().unwrap();
        match transition {
            Transition::Enqueue => {
                ops.entry(id.index).or_insert_with(|| (id.name.clone(), Status::Ready)).1 = Status::Ready;
            },
            Transition::Activate | Transition::Resume => {
                ops.entry(id.index).or_insert_with(|| (id.name.clone(), Status::Running)).1 = Status::Running;
            },
            Transition::Deactivate | Transition::Suspend => {
                if let Some(entry) = ops.get_mut(&id.index) {
                    entry.1 = Status::Waiting;
                }
            },
            Transition::Finish => {
                ops.remove(&id.index);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::operation::OpId;
    use crate::scheduler::Scheduler;

    #[test]
    fn tracker_follows_lifecycle() {
        let scheduler = Scheduler::new();
        let tracker = Tracker::new();
        let future = scheduler.post_work(tracker.clone(), || 7, OpId::new("tracked", "track.rs"));
        assert_eq!(tracker.statuses(), vec![(future.callee().index, "tracked".to_string(), Status::Ready)]);

        scheduler.run(1);
        assert_eq!(*future.val(), 7);
        assert!(tracker.is_empty());
    }

    #[test]
    fn tracker_marks_waiting_operations() {
        let scheduler = Scheduler::new();
        let tracker = Tracker::new();
        let samples = Arc::new(Mutex::new(Vec::new()));
        {
            let scheduler = scheduler.clone();
            let tracker = tracker.clone();
            let samples = samples.clone();
            scheduler.clone().enqueue(
                tracker.clone(),
                move || {
                    let inner = scheduler.post_work(
                        (),
                        {
                            let tracker = tracker.clone();
                            let samples = samples.clone();
                            move || {
                                // The single worker only reaches this operation
                                // once the outer one suspended awaiting it.
                                samples.lock().unwrap().push(tracker.statuses());
                                1
                            }
                        },
                        OpId::new("inner", "track.rs"),
                    );
                    assert_eq!(*inner.val(), 1);
                },
                OpId::new("outer", "track.rs"),
                crate::scheduler::Lane::Work,
            );
        }
        scheduler.run(1);
        let samples = samples.lock().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].len(), 1);
        assert_eq!(samples[0][0].2, Status::Waiting);
        assert!(tracker.is_empty());
    }
}
