//! Squares a vector with one operation per element.

use std::sync::{Arc, Mutex};

use strand::{op_id, Lane, Scheduler};

fn main() {
    let values: Vec<i64> = (0..20).collect();
    println!("before:");
    println!("{:?}", values);

    let squared = Arc::new(Mutex::new(Vec::new()));
    let scheduler = Scheduler::new();
    {
        let squared = squared.clone();
        scheduler.enqueue(
            (),
            move || {
                let results = squared.clone();
                strand::parallel_for(
                    values,
                    move |value| results.lock().unwrap().push(value * value),
                    op_id!("square"),
                )
                .unwrap();
                squared.lock().unwrap().sort_unstable();
            },
            op_id!("driver"),
            Lane::Work,
        );
    }

    scheduler.run(8);

    println!("after:");
    println!("{:?}", squared.lock().unwrap());
}
