//! Scheduling policy abstraction: the pluggable contract the dispatcher
//! drives, plus the named-policy registry.
//!
//! Grounded on `original_source/src/core/sched_policy.c`'s
//! `starpu_sched_policy_s` vtable (`init_sched`/`deinit_sched`/`push_task`/
//! `push_prio_task`/`pop_task`/`pop_every_task`/`post_exec_hook`), adapted to
//! a Rust trait object the way the teacher's `AdapterRegistry` maps names to
//! trait-object constructors.

pub mod policies;
pub mod registry;

use std::sync::Arc;

use crate::error::Result;
use crate::task::Task;
use crate::worker::{DeviceKind, WorkerId};

/// A scheduling policy instance. Exactly one is active process-wide for the
/// lifetime of a [`crate::runtime::Runtime`].
///
/// `push_task`/`pop_task` are the required capability set; the rest default
/// to no-ops, matching the source vtable's optional function pointers.
pub trait SchedPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Enqueue a task for later dispatch. `Err(PolicyRejected)` tells the
    /// caller to retry; a policy must never block indefinitely here.
    fn push_task(&self, task: Arc<Task>) -> Result<()>;

    /// Called from the worker identified by `worker_id`/`device_kind`;
    /// returns the next task for *that* worker, or `None` if none eligible.
    /// May spuriously return `None` under races with concurrent pushes.
    fn pop_task(&self, worker_id: WorkerId, device_kind: DeviceKind) -> Option<Arc<Task>>;

    /// Priority-tagged push path; policies without a distinct priority
    /// lane fall back to the ordinary push.
    fn push_prio_task(&self, task: Arc<Task>) -> Result<()> {
        self.push_task(task)
    }

    /// Every currently queued task, used by flush semantics. Policies that
    /// don't support a consistent snapshot return an empty list.
    fn pop_every_task(&self) -> Vec<Arc<Task>> {
        Vec::new()
    }

    /// Called after a non-pinned task finishes; used by policies that
    /// track per-worker load or calibration.
    fn post_exec_hook(&self, _task: &Task) {}

    /// Torn down when the runtime shuts the policy down.
    fn deinit(&self) {}
}
