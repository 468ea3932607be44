//! Error type for the distributed shim.

use dagrt_core::task::TaskId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A task's write-bound handles disagree on who owns the data: one
    /// says this rank, another says a different rank. Logged and the task
    /// is never submitted on any rank.
    #[error("task {task_id} has conflicting owner-computes inference across its handles")]
    ConflictingOwner { task_id: TaskId },

    #[error(transparent)]
    Core(#[from] dagrt_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
