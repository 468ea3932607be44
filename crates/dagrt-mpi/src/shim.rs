//! Owner-computes distributed dispatch: decide which rank actually runs a
//! task from the ranks its write-bound handles live on, and post the
//! cross-rank transfers the other ranks will need.
//!
//! Grounded on `original_source/mpi/starpu_mpi_insert_task.c`'s two-pass
//! algorithm: a first pass over the task's handle bindings infers
//! `do_execute` from who owns each `W`/`RW` handle (erroring out if two
//! bindings disagree), then a second pass posts `irecv_detached` for
//! handles this rank needs but doesn't own, and `isend_detached` for
//! handles this rank owns but another rank needs. No `MPI_CACHE`-equivalent
//! is implemented: the original leaves it permanently disabled ("does not
//! work yet"), and received buffers are assumed to live for as long as the
//! owning `DataHandle` does.

use std::sync::Arc;

use dagrt_core::handle::AccessMode;
use dagrt_core::task::{Task, TaskId};
use dagrt_core::Runtime;

use crate::comm::CommBackend;
use crate::error::{Error, Result};

/// The outcome of inferring who should run a task from its handle owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoExecute {
    /// This rank owns (at least one of) the task's written handles.
    Yes,
    /// `dest_rank` owns them; this rank only posts the transfers its own
    /// read/read-write bindings need.
    No { dest_rank: i64 },
    /// No binding carried ownership information (e.g. a control task, or a
    /// task with no `W`/`RW` bindings at all): default to running locally,
    /// matching a task with no data dependencies being trivially local.
    Unowned,
}

/// Distributed dispatch for a single rank. Wraps a local [`Runtime`] and a
/// [`CommBackend`]; every task that would otherwise go straight to
/// `Runtime::task_submit` should instead go through
/// [`OwnerComputesShim::insert_task`].
pub struct OwnerComputesShim<C: CommBackend> {
    my_rank: i64,
    comm: Arc<C>,
}

impl<C: CommBackend> OwnerComputesShim<C> {
    pub fn new(my_rank: i64, comm: Arc<C>) -> Self {
        Self { my_rank, comm }
    }

    pub fn my_rank(&self) -> i64 {
        self.my_rank
    }

    /// First pass: infer `do_execute` from the ranks owning the task's
    /// `W`/`RW` handles. A null handle on a write binding is a safeguard,
    /// not an error -- the original returns without submitting anywhere;
    /// callers here get `Ok(None)` from [`OwnerComputesShim::insert_task`].
    fn infer_do_execute(&self, task: &Task) -> Result<DoExecute> {
        let mut do_execute: Option<bool> = None;
        let mut remote_owner: Option<i64> = None;

        for binding in &task.bindings {
            if !binding.mode.is_exclusive() {
                continue;
            }
            let Some(handle) = &binding.handle else {
                continue;
            };
            let owner = handle.owner_rank();
            if owner == -1 {
                continue;
            }
            if owner == self.my_rank {
                if do_execute == Some(false) {
                    return Err(Error::ConflictingOwner { task_id: task.id });
                }
                do_execute = Some(true);
            } else {
                if do_execute == Some(true) {
                    return Err(Error::ConflictingOwner { task_id: task.id });
                }
                do_execute = Some(false);
                remote_owner = Some(owner);
            }
        }

        Ok(match do_execute {
            Some(true) => DoExecute::Yes,
            Some(false) => DoExecute::No {
                dest_rank: remote_owner.expect("remote_owner set whenever do_execute is Some(false)"),
            },
            None => DoExecute::Unowned,
        })
    }

    /// Whether any `W`/`RW` binding carries a null handle -- the safeguard
    /// case the original silently returns on without submitting the task
    /// anywhere.
    fn has_null_write_binding(task: &Task) -> bool {
        task.bindings
            .iter()
            .any(|b| b.mode.is_exclusive() && b.handle.is_none())
    }

    /// Second pass: post the transfers this rank's `R`/`RW` bindings need
    /// given the `do_execute` outcome of the first pass.
    async fn post_transfers(&self, task: &Task, decision: DoExecute) {
        for binding in &task.bindings {
            if !matches!(binding.mode, AccessMode::Read | AccessMode::ReadWrite) {
                continue;
            }
            let Some(handle) = &binding.handle else {
                continue;
            };
            let owner = handle.owner_rank();
            match decision {
                DoExecute::Yes if owner != -1 && owner != self.my_rank => {
                    self.comm.irecv_detached(handle.id(), owner).await;
                }
                DoExecute::No { dest_rank } if owner == self.my_rank => {
                    self.comm.isend_detached(handle.id(), dest_rank).await;
                }
                _ => {}
            }
        }
    }

    /// `starpu_mpi_insert_task`'s role: infer ownership, post the transfers
    /// every rank needs, and submit locally only on the owning rank.
    /// Returns the task's id if it was submitted on this rank, `None`
    /// otherwise (remote execution, or the null-handle safeguard).
    pub async fn insert_task(&self, runtime: &Runtime, task: Task) -> Result<Option<TaskId>> {
        if Self::has_null_write_binding(&task) {
            tracing::debug!(task_name = %task.name, "insert_task: null handle on a write binding, skipping");
            return Ok(None);
        }

        let decision = self.infer_do_execute(&task)?;
        self.post_transfers(&task, decision).await;

        match decision {
            DoExecute::Yes | DoExecute::Unowned => Ok(Some(runtime.task_submit(task)?)),
            DoExecute::No { .. } => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagrt_core::codelet::Codelet;
    use dagrt_core::handle::DataHandle;
    use dagrt_core::task::TaskBuilder;
    use dagrt_core::worker::DeviceKind;

    fn noop_codelet() -> Arc<Codelet> {
        Arc::new(
            Codelet::builder("noop")
                .implementation(DeviceKind::Cpu, Arc::new(|| Box::pin(async { Ok(()) })))
                .build(),
        )
    }

    #[test]
    fn conflicting_owners_on_two_write_bindings_is_rejected() {
        let shim = OwnerComputesShim::new(0, Arc::new(NoopBackend));
        let owned_by_me = DataHandle::new(0);
        let owned_elsewhere = DataHandle::new(1);
        let task = TaskBuilder::new("bad")
            .codelet(noop_codelet())
            .handle(owned_by_me, AccessMode::Write)
            .handle(owned_elsewhere, AccessMode::ReadWrite)
            .build();
        let result = shim.infer_do_execute(&task);
        assert!(matches!(result, Err(Error::ConflictingOwner { .. })));
    }

    #[test]
    fn control_task_with_no_write_bindings_defaults_to_local() {
        let shim = OwnerComputesShim::new(0, Arc::new(NoopBackend));
        let task = TaskBuilder::new("ctrl").build();
        assert_eq!(shim.infer_do_execute(&task).unwrap(), DoExecute::Unowned);
    }

    #[test]
    fn null_handle_on_write_is_a_safeguard_not_an_error() {
        let task = TaskBuilder::new("guarded")
            .codelet(noop_codelet())
            .null_handle(AccessMode::Write)
            .build();
        assert!(OwnerComputesShim::<NoopBackend>::has_null_write_binding(&task));
    }

    struct NoopBackend;
    #[async_trait::async_trait]
    impl CommBackend for NoopBackend {
        async fn isend_detached(&self, _handle: dagrt_core::handle::HandleId, _dest_rank: i64) {}
        async fn irecv_detached(&self, _handle: dagrt_core::handle::HandleId, _source_rank: i64) {}
    }
}
