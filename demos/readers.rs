//! Interleaved reader/writer workload over one declared resource.
//!
//! 2000 rounds of seven readers and one writer; admission keeps the plain
//! RwLock uncontended, which every access asserts with try_read/try_write.

use std::sync::{Arc, RwLock};

use strand::{op_id, AccessRequest, AccessScheduler, Lane, Scheduler};

fn main() {
    let scheduler = Scheduler::new();
    let access = AccessScheduler::new(scheduler.clone());
    let data = Arc::new(RwLock::new(vec![1u64, 1]));

    for _ in 0..2000 {
        for _ in 0..7 {
            let data = data.clone();
            access.enqueue(
                (),
                move || {
                    let data = data.try_read().expect("read overlapped a write");
                    let sum = data.iter().fold(0u64, |acc, value| acc.wrapping_add(*value));
                    if sum != 0 && sum % 1000 == 0 {
                        println!("{}", sum);
                    }
                },
                op_id!("read"),
                Lane::Work,
                vec![AccessRequest::read(0)],
            );
        }
        let data = data.clone();
        access.enqueue(
            (),
            move || {
                let mut data = data.try_write().expect("write overlapped another access");
                let next = data[data.len() - 1].wrapping_add(data[data.len() - 2]);
                data.push(next);
            },
            op_id!("write"),
            Lane::Work,
            vec![AccessRequest::write(0)],
        );
    }

    scheduler.run(4);

    println!("{}", data.read().unwrap().last().unwrap());
}
