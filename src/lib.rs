#![allow(clippy::needless_doctest_main)]

//! # Cooperative stackful-fiber scheduling
//! `strand` runs synchronous-looking call graphs across a small pool of worker
//! threads. A submitted function becomes an operation with its own fiber
//! stack; awaiting a [future::Future] suspends only the fiber, never the
//! worker thread, so deeply nested fan-out/fan-in keeps every thread busy.
//!
//! ## Usage
//! Construct a [scheduler::Scheduler], submit work through
//! [scheduler::Scheduler::post] or [call], and drive the pool with
//! [scheduler::Scheduler::run]. Shared state is mediated by declaring
//! (resource, access) pairs on an [access::AccessScheduler] instead of ad hoc
//! locking.
//!
//! ## Example
//! ```rust
//! use strand::call;
//!
//! fn fib(n: u64) -> u64 {
//!     if n < 2 {
//!         return n;
//!     }
//!     let first = call!((), move || fib(n - 1), "fib");
//!     let second = call!((), move || fib(n - 2), "fib");
//!     *first.val() + *second.val()
//! }
//!
//! #[strand::main(threads = 2)]
//! fn main() {
//!     assert_eq!(fib(10), 55);
//! }
//! ```

pub mod access;
mod error;
pub mod future;
pub mod operation;
pub mod parallel;
mod runner;
pub mod scheduler;
pub mod track;

pub use access::{Access, AccessRequest, AccessScheduler, ResourceId};
pub use error::TaskError;
pub use future::{await_all, ConditionVariable, Future};
pub use operation::{OpId, Probe, StackSize, Transition};
pub use parallel::parallel_for;
pub use scheduler::{call, Lane, Scheduler};
#[cfg(not(test))]
pub use strand_macros::main;
pub use strand_macros::test;
pub use track::{Status, Tracker};
