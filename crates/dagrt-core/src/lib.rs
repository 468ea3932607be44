//! Dependency engine, scheduling policy abstraction, and worker dispatch
//! loop for a heterogeneous DAG task runtime. The core triple named in the
//! purpose & scope: how tasks that share data handles get ordered, how a
//! ready task picks a worker, and how a worker drains its queue.
//!
//! A fragment of distributed (owner-computes) dispatch layers on top of
//! this crate's submission contract in the sibling `dagrt-mpi` crate.

pub mod codelet;
pub mod deps;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod handle;
pub mod memory;
pub mod priority_deque;
pub mod runtime;
pub mod sched;
pub mod task;
pub mod worker;

pub use error::{Error, Result};
pub use runtime::{Runtime, RuntimeConfig};
pub use task::{Task, TaskBuilder, TaskId, TaskStatus};
