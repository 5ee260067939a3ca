//! Suspend-per-element application built on the public post API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TaskError;
use crate::operation::{self, OpId};

/// Applies `f` to every element as its own work-lane operation and awaits them
/// all, suspending the calling fiber. Elements not yet started when one fails
/// are skipped; the first error is returned once every posted operation
/// completed. The caller is recorded as parent of each element operation.
pub fn parallel_for<I, T, F>(items: I, f: F, mut id: OpId) -> Result<(), TaskError>
where
    I: IntoIterator<Item = T>,
    T: Send + 'static,
    F: Fn(T) + Clone + Send + 'static,
{
    let op = operation::current();
    id.parent = op.id().index;
    let scheduler = op.scheduler().expect("scheduler already dropped");

    let failed = Arc::new(AtomicBool::new(false));
    let futures: Vec<_> = items
        .into_iter()
        .map(|item| {
            let f = f.clone();
            let failed = failed.clone();
            scheduler.post_work(
                (),
                move || {
                    if failed.load(Ordering::Relaxed) {
                        return;
                    }
                    f(item)
                },
                id.clone(),
            )
        })
        .collect();

    let mut first = None;
    for future in &futures {
        if let Err(err) = future.result() {
            failed.store(true, Ordering::Relaxed);
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
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    #[crate::test(crate = "crate", threads = 4)]
    fn parallel_for_applies_to_every_element() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let expected: Vec<i64> = (0..20).map(|value| value * value).collect();
        {
            let results = results.clone();
            parallel_for(
                0..20i64,
                move |value| results.lock().unwrap().push(value * value),
                crate::op_id!("square"),
            )
            .unwrap();
        }
        let mut squared = results.lock().unwrap().clone();
        squared.sort_unstable();
        assert_eq!(squared, expected);
    }

    #[crate::test(crate = "crate", threads = 2)]
    fn parallel_for_returns_first_error() {
        let err = parallel_for(
            0..4,
            |value| {
                if value == 2 {
                    panic!("bad element");
                }
            },
            crate::op_id!("maybe"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad element"));
    }
}
