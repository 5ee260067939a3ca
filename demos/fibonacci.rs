//! Recursive fibonacci decomposed into nested operations.
//!
//! Every asynchronous step posts two child operations and suspends awaiting
//! their futures; small inputs fall back to the plain recursion.

use strand::{call, op_id, Lane, Scheduler};

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

fn recfib_async(i: u64) -> u64 {
    if i < 20 {
        return recfib_sync(i);
    }
    let first = call!((), move || recfib_async(i - 1), "fib");
    let second = call!((), move || recfib_async(i - 2), "fib");
    *first.val() + *second.val()
}

fn check(n: u64, expected: u64) {
    let actual = *call!((), move || recfib_async(n), "check").val();
    if actual == expected {
        println!("fib result matched {}: {}", n, expected);
    } else {
        println!("fib result did not match {}: {} != {}", n, actual, expected);
    }
}

fn main() {
    const COUNT: u64 = 30;

    let expected: Vec<u64> = (0..COUNT).map(iterfib).collect();

    let scheduler = Scheduler::new();
    for n in 0..COUNT {
        let expected = expected[n as usize];
        scheduler.enqueue((), move || check(n, expected), op_id!("check"), Lane::Work);
    }

    scheduler.run(8);
}
