use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use pretty_assertions::assert_eq;
use strand::{call, AccessRequest, AccessScheduler, ConditionVariable, Lane, OpId, Scheduler, StackSize};

fn iterfib(count: u64) -> u64 {
    if count == 0 {
        return 0;
    }
    if count == 1 {
        return 1;
    }
    let mut i = 0u64;
    let mut j = 1u64;
    for _ in 0..count - 1 {
        let tmp = j;
        j = i + j;
        i = tmp;
    }
    j
}

fn recfib_sync(i: u64) -> u64 {
    if i < 2 {
        return i;
    }
    recfib_sync(i - 1) + recfib_sync(i - 2)
}

fn recfib(i: u64) -> u64 {
    if i < 10 {
        return recfib_sync(i);
    }
    let first = call!((), move || recfib(i - 1), "fib");
    let second = call!((), move || recfib(i - 2), "fib");
    *first.val() + *second.val()
}

#[strand::test(threads = 4)]
fn test_recursive_fibonacci() {
    assert_eq!(recfib(10), 55);
    assert_eq!(recfib(15), iterfib(15));
    assert_eq!(recfib(20), 6765);
}

#[strand::test(threads = 2)]
fn test_panic_propagates_idempotently() {
    let future = call!((), || -> i32 { panic!("kaboom") }, "boom");
    let err = future.result().unwrap_err();
    assert!(err.to_string().contains("kaboom"));
    let again = future.result().unwrap_err();
    assert!(again.to_string().contains("kaboom"));
}

#[strand::test(threads = 2)]
fn test_panic_chains_through_nested_calls() {
    let outer = call!(
        (),
        || {
            let inner = call!((), || -> u32 { panic!("inner failure") }, "inner");
            *inner.val()
        },
        "outer"
    );
    let err = outer.result().unwrap_err();
    assert!(err.to_string().contains("inner failure"));
}

#[strand::test(threads = 2)]
fn test_condition_variable_handoff() {
    let flag = Arc::new(AtomicBool::new(false));
    let cv = Arc::new(ConditionVariable::new());
    {
        let flag = flag.clone();
        let cv = cv.clone();
        let _ = call!(
            (),
            move || {
                flag.store(true, Ordering::Release);
                cv.notify();
            },
            "notifier"
        );
    }
    cv.wait(|| flag.load(Ordering::Acquire));
    assert!(flag.load(Ordering::Acquire));
}

#[test]
fn test_stack_reuse() {
    let scheduler = Scheduler::new();
    for _ in 0..8 {
        scheduler.enqueue((), || (), OpId::new("noop", "strand.rs"), Lane::Work);
    }
    scheduler.run(1);
    let allocated = scheduler.allocated_stacks();
    assert!(allocated >= 1);
    assert_eq!(scheduler.pooled_stacks(), allocated);

    for _ in 0..8 {
        scheduler.enqueue((), || (), OpId::new("noop", "strand.rs"), Lane::Work);
    }
    scheduler.run(1);
    assert_eq!(scheduler.allocated_stacks(), allocated);
}

#[test]
fn test_reader_writer_stress() {
    let scheduler = Scheduler::with_stack_size(StackSize::with_size(32 * 1024));
    let access = AccessScheduler::new(scheduler.clone());
    let data = Arc::new(RwLock::new(vec![1u64, 1]));
    let writes = Arc::new(AtomicUsize::new(0));
    for _ in 0..2000 {
        for _ in 0..7 {
            let data = data.clone();
            access.enqueue(
                (),
                move || {
                    let data = data.try_read().expect("read overlapped a write");
                    let sum = data.iter().fold(0u64, |acc, value| acc.wrapping_add(*value));
                    assert!(sum >= 2);
                },
                OpId::new("read", "strand.rs"),
                Lane::Work,
                vec![AccessRequest::read(0)],
            );
        }
        let data = data.clone();
        let writes = writes.clone();
        access.enqueue(
            (),
            move || {
                let mut data = data.try_write().expect("write overlapped another access");
                let next = data[data.len() - 1].wrapping_add(data[data.len() - 2]);
                data.push(next);
                writes.fetch_add(1, Ordering::Relaxed);
            },
            OpId::new("write", "strand.rs"),
            Lane::Work,
            vec![AccessRequest::write(0)],
        );
    }
    scheduler.run(4);

    assert_eq!(writes.load(Ordering::Relaxed), 2000);
    let data = data.read().unwrap();
    assert_eq!(data.len(), 2002);
    for i in 2..data.len() {
        assert_eq!(data[i], data[i - 1].wrapping_add(data[i - 2]));
    }
    assert_eq!(access.resource_count(), 0);
}

#[test]
fn test_writer_spanning_two_resources() {
    let scheduler = Scheduler::new();
    let access = AccessScheduler::new(scheduler.clone());
    let writing = Arc::new(AtomicBool::new(false));
    for resource in [1u64, 2] {
        for _ in 0..20 {
            let writing = writing.clone();
            access.enqueue(
                (),
                move || {
                    assert!(!writing.load(Ordering::SeqCst));
                },
                OpId::new("read", "strand.rs"),
                Lane::Work,
                vec![AccessRequest::read(resource)],
            );
        }
    }
    {
        let writing = writing.clone();
        access.enqueue(
            (),
            move || {
                writing.store(true, Ordering::SeqCst);
                writing.store(false, Ordering::SeqCst);
            },
            OpId::new("write-both", "strand.rs"),
            Lane::Work,
            vec![AccessRequest::write(1), AccessRequest::write(2)],
        );
    }
    scheduler.run(4);
    assert_eq!(access.resource_count(), 0);
}

fn random_work(depth: u32) -> u64 {
    if depth == 0 || fastrand::u32(0..100) < 60 {
        return 1;
    }
    let count = fastrand::usize(1..4);
    let futures: Vec<_> = (0..count).map(|_| call!((), move || random_work(depth - 1), "work")).collect();
    futures.iter().map(|future| *future.val()).sum::<u64>() + 1
}

#[strand::test(threads = 4)]
fn test_random_call_graph() {
    fastrand::seed(42);
    let futures: Vec<_> = (0..20).map(|_| call!((), || random_work(3), "root")).collect();
    let total: u64 = futures.iter().map(|future| *future.val()).sum();
    assert!(total >= 20);
}
