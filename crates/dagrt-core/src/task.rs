//! Task descriptors and lifecycle state.
//!
//! A [`Task`] is immutable after submission except for the status and
//! profiling fields tracked separately in [`crate::runtime::Runtime`]'s task
//! table -- mirroring the split the teacher keeps between a `QueuedTask`'s
//! immutable work closure and the `DashMap<TaskId, TaskInfo>` that carries
//! mutable metadata.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codelet::Codelet;
use crate::handle::{AccessMode, DataHandle};
use crate::worker::WorkerId;

/// Unique, time-ordered task identifier.
pub type TaskId = Uuid;

/// Lifecycle state of a task, per the data model's state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Init,
    Ready,
    Blocked,
    Running,
    Done,
    Failed,
}

/// One `{handle, access_mode}` binding declared by a task.
///
/// `handle` is `None` for the null-handle safeguard case: a caller that
/// elected not to allocate a shard may still bind it with a `Write` mode so
/// the task descriptor stays uniform; the dependency engine detects this and
/// skips the task rather than submitting it (`NullHandleOnWrite`).
#[derive(Clone)]
pub struct HandleBinding {
    pub handle: Option<DataHandle>,
    pub mode: AccessMode,
}

impl fmt::Debug for HandleBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleBinding")
            .field("handle", &self.handle.as_ref().map(DataHandle::id))
            .field("mode", &self.mode)
            .finish()
    }
}

/// Profiling timestamps recorded by the dispatcher and worker loop.
///
/// These are the only two hooks this crate owns (push start/end, pop
/// start/end); calibration and broader performance-model timestamps are an
/// out-of-scope external collaborator per the purpose & scope section.
#[derive(Debug, Default, Clone, Copy)]
pub struct Profiling {
    pub push_start: Option<Instant>,
    pub push_end: Option<Instant>,
    pub pop_start: Option<Instant>,
    pub pop_end: Option<Instant>,
}

/// A unit of work submitted to the runtime.
///
/// Control tasks (`codelet == None`) carry no kernel; completing one simply
/// runs its callback and resolves its successors.
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub codelet: Option<Arc<Codelet>>,
    pub bindings: Vec<HandleBinding>,
    pub priority: i32,
    pub pinned_worker: Option<WorkerId>,
    pub explicit_deps: Vec<TaskId>,
    /// `Fn` rather than `FnOnce`: the task descriptor is shared through an
    /// `Arc` between the dependency engine and the dispatcher, so the
    /// callback can't be moved out by value. Callers are responsible for the
    /// "runs exactly once" contract; the dispatcher invokes it exactly once
    /// per task, on the control-task path or after kernel completion.
    pub callback: Option<Box<dyn Fn() + Send + Sync>>,
    /// Inline by-value arguments copied into the descriptor (`STARPU_VALUE`),
    /// as opposed to data shared through a handle.
    pub values: HashMap<String, Vec<u8>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_control", &self.codelet.is_none())
            .field("bindings", &self.bindings)
            .field("priority", &self.priority)
            .field("pinned_worker", &self.pinned_worker)
            .field("explicit_deps", &self.explicit_deps)
            .finish()
    }
}

impl Task {
    pub fn is_control(&self) -> bool {
        self.codelet.is_none()
    }
}

/// Read-only snapshot of a task's status, handed back to callers that poll
/// task state (the analogue of the teacher's `TaskInfo`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub priority: i32,
    pub status: TaskStatus,
}

/// Builder for tasks, replacing the variadic tag/value `insert_task` stream
/// with typed methods -- the rewrite called for in the design notes.
///
/// The source stream's `CALLBACK`/`CALLBACK_ARG` pair collapses into a single
/// `callback` closure here: a closure already captures whatever argument it
/// needs, so there is nothing left for a separate `_ARG` method to carry.
/// `callback` may still only be set once; a second call is a no-op, matching
/// "the first of each kind wins" for whichever callback-related tag arrives
/// first in the source stream.
pub struct TaskBuilder {
    name: String,
    codelet: Option<Arc<Codelet>>,
    bindings: Vec<HandleBinding>,
    priority: i32,
    pinned_worker: Option<WorkerId>,
    explicit_deps: Vec<TaskId>,
    callback: Option<Box<dyn Fn() + Send + Sync>>,
    values: HashMap<String, Vec<u8>>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            codelet: None,
            bindings: Vec::new(),
            priority: 0,
            pinned_worker: None,
            explicit_deps: Vec::new(),
            callback: None,
            values: HashMap::new(),
        }
    }

    pub fn codelet(mut self, codelet: Arc<Codelet>) -> Self {
        self.codelet = Some(codelet);
        self
    }

    pub fn handle(mut self, handle: DataHandle, mode: AccessMode) -> Self {
        self.bindings.push(HandleBinding {
            handle: Some(handle),
            mode,
        });
        self
    }

    /// Bind a `Write`/`ReadWrite` mode with no handle allocated -- the
    /// safeguard case the dependency engine treats as `NullHandleOnWrite`.
    pub fn null_handle(mut self, mode: AccessMode) -> Self {
        self.bindings.push(HandleBinding { handle: None, mode });
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn pin_to_worker(mut self, worker: WorkerId) -> Self {
        self.pinned_worker = Some(worker);
        self
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.explicit_deps.extend(deps);
        self
    }

    /// Equivalent of `STARPU_VALUE`: an inline, by-value argument copied into
    /// the task descriptor rather than shared through a handle.
    pub fn value(mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.values.insert(key.into(), bytes.into());
        self
    }

    /// First call wins, matching the accepted ordering ambiguity between
    /// `STARPU_CALLBACK` and `STARPU_CALLBACK_ARG` in the original stream.
    pub fn callback(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        if self.callback.is_none() {
            self.callback = Some(Box::new(callback));
        }
        self
    }

    pub fn build(self) -> Task {
        Task {
            id: Uuid::now_v7(),
            name: self.name,
            codelet: self.codelet,
            bindings: self.bindings,
            priority: self.priority,
            pinned_worker: self.pinned_worker,
            explicit_deps: self.explicit_deps,
            callback: self.callback,
            values: self.values,
        }
    }
}
