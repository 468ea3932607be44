//! Core error types.
//!
//! All public APIs in this crate surface errors through [`Error`], the
//! single error type for the crate -- mirroring the teacher's
//! `KernelError`, one variant per failure kind with the context needed to
//! act on it without parsing a string.

use crate::task::TaskId;
use crate::worker::WorkerId;

/// Unified error type for the dagrt-core dependency engine, scheduler, and
/// dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No worker can execute this task's codelet on any device. Not fatal;
    /// the caller (or a test harness) treats it as a skip.
    #[error("no worker can execute task {task_id}")]
    NoDevice { task_id: TaskId },

    /// The scheduling policy's `push_task` refused the task. Retry
    /// semantics are the caller's responsibility; a task is never silently
    /// dropped.
    #[error("scheduling policy rejected task {task_id}, retry later")]
    PolicyRejected { task_id: TaskId },

    /// A task bound `W` with a null handle. Logged and the task is skipped
    /// as a safeguard against a caller that elected not to allocate the
    /// shard.
    #[error("task {task_id} has a write binding on a null handle")]
    NullHandleOnWrite { task_id: TaskId },

    /// Submitting a task whose id is already known to the engine.
    #[error("task {task_id} was already submitted")]
    DuplicateSubmit { task_id: TaskId },

    /// The referenced task does not exist in the runtime's task table.
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },

    /// The referenced worker does not exist.
    #[error("worker not found: {worker_id:?}")]
    WorkerNotFound { worker_id: WorkerId },

    /// An internal invariant was violated: conflicting owner inference in
    /// the distributed shim, a non-empty priority deque at destroy time, a
    /// double-execute. These indicate a defect in the caller and are fatal.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// Catch-all for unexpected internal errors that don't fit a more
    /// specific variant.
    #[error("internal dagrt error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
