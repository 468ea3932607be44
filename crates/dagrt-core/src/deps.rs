//! Dependency engine: per-handle access queues enforcing read/write
//! ordering, plus explicit task-to-task dependency resolution.
//!
//! Grounded on the teacher's `Scheduler` (`scheduler.rs`) for the overall
//! shape -- a `DashMap<TaskId, _>` of authoritative per-task state plus an
//! `on_ready` handoff standing in for the teacher's own queue-and-notify --
//! generalized to the countdown-latch promotion this system's handle FIFOs
//! and explicit deps require.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::handle::RequestorId;
use crate::task::{Task, TaskId, TaskSnapshot, TaskStatus};

/// Status and completion-waiter bookkeeping for one submitted task,
/// protected by a single mutex so a dependent's registration and a
/// predecessor's completion can never race each other.
struct DepState {
    status: TaskStatus,
    /// Tasks that registered an explicit dependency on this one before it
    /// reached `Done`.
    waiters: Vec<TaskId>,
}

struct TaskEntry {
    task: Arc<Task>,
    /// Outstanding promotion units: one per unresolved explicit dep, one per
    /// non-scratch handle binding not yet at its FIFO head, plus one
    /// "registration" unit held until `submit` finishes enqueueing
    /// everything. Reaching zero makes the task Ready.
    remaining: AtomicUsize,
    promoted: AtomicBool,
    dep_state: Mutex<DepState>,
}

impl TaskEntry {
    fn new(task: Arc<Task>) -> Self {
        Self {
            task,
            remaining: AtomicUsize::new(1),
            promoted: AtomicBool::new(false),
            dep_state: Mutex::new(DepState {
                status: TaskStatus::Init,
                waiters: Vec::new(),
            }),
        }
    }

    fn status(&self) -> TaskStatus {
        self.dep_state.lock().expect("dep_state poisoned").status
    }

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.task.id,
            name: self.task.name.clone(),
            priority: self.task.priority,
            status: self.status(),
        }
    }
}

/// The hook a ready task is handed to -- in practice `Dispatcher::push`.
pub type ReadyHandler = Arc<dyn Fn(Arc<Task>) + Send + Sync>;

/// Per-handle FIFOs plus the explicit-dependency graph.
///
/// Cheaply cloneable; clones share the same task table. The ready handler
/// is bound after construction via [`DependencyEngine::set_ready_handler`]
/// rather than passed to `new`, since the dispatcher it typically points to
/// itself needs a `DependencyEngine` to construct -- the two are wired
/// together after both exist.
#[derive(Clone)]
pub struct DependencyEngine {
    tasks: Arc<DashMap<TaskId, Arc<TaskEntry>>>,
    on_ready: Arc<std::sync::OnceLock<ReadyHandler>>,
    next_app_request: Arc<AtomicU64>,
}

impl DependencyEngine {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            on_ready: Arc::new(std::sync::OnceLock::new()),
            next_app_request: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bind the handler a task is handed to once it becomes Ready. Must be
    /// called exactly once before any task can be promoted; a second call
    /// is a no-op.
    pub fn set_ready_handler(&self, handler: ReadyHandler) {
        let _ = self.on_ready.set(handler);
    }

    /// Submit a task: register it against every explicit predecessor and
    /// every non-scratch handle binding, and hand it to `on_ready` once (and
    /// exactly once) everything resolves.
    pub fn submit(&self, task: Arc<Task>) -> Result<()> {
        for binding in &task.bindings {
            if binding.mode.is_exclusive() && binding.handle.is_none() {
                tracing::warn!(task_id = %task.id, "write binding on null handle, skipping task");
                return Err(Error::NullHandleOnWrite { task_id: task.id });
            }
        }

        let id = task.id;
        if self.tasks.contains_key(&id) {
            return Err(Error::DuplicateSubmit { task_id: id });
        }

        let entry = Arc::new(TaskEntry::new(task.clone()));
        self.tasks.insert(id, entry.clone());
        tracing::debug!(task_id = %id, name = %task.name, priority = task.priority, "task submitted");

        for dep_id in &task.explicit_deps {
            let Some(dep_entry) = self.tasks.get(dep_id).map(|e| e.clone()) else {
                // An explicit dep that was never submitted can never
                // resolve; treat it the same as an already-completed one
                // rather than deadlocking the submitter.
                tracing::warn!(task_id = %id, dep_id = %dep_id, "explicit dep not found, ignoring");
                continue;
            };
            let mut dep_state = dep_entry.dep_state.lock().expect("dep_state poisoned");
            if dep_state.status != TaskStatus::Done {
                dep_state.waiters.push(id);
                entry.remaining.fetch_add(1, Ordering::AcqRel);
            }
        }

        for binding in &task.bindings {
            use crate::handle::AccessMode;
            if binding.mode == AccessMode::Scratch {
                continue;
            }
            let Some(handle) = binding.handle.clone() else {
                continue;
            };
            entry.remaining.fetch_add(1, Ordering::AcqRel);
            let engine = self.clone();
            handle.submit_request(RequestorId::Task(id), binding.mode, move || {
                engine.try_promote(id);
            });
        }

        self.try_promote(id);
        Ok(())
    }

    /// Release the initial registration unit / a granted binding's unit and
    /// fire `on_ready` exactly once when the count reaches zero. Idempotent
    /// under duplicate calls for an already-promoted task.
    fn try_promote(&self, id: TaskId) {
        let Some(entry) = self.tasks.get(&id).map(|e| e.clone()) else {
            return;
        };
        let prev = entry.remaining.fetch_sub(1, Ordering::AcqRel);
        if prev != 1 {
            return;
        }
        if entry.promoted.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut dep_state = entry.dep_state.lock().expect("dep_state poisoned");
            dep_state.status = TaskStatus::Ready;
        }
        tracing::debug!(task_id = %id, "task ready");
        match self.on_ready.get() {
            Some(handler) => handler(entry.task.clone()),
            None => tracing::warn!(task_id = %id, "task ready but no ready handler bound"),
        }
    }

    /// Mark a task Done: release its handle bindings (re-evaluating each
    /// handle's FIFO head) and wake every explicit dependent.
    pub fn complete(&self, id: TaskId) -> Result<()> {
        let Some(entry) = self.tasks.get(&id).map(|e| e.clone()) else {
            return Err(Error::TaskNotFound { task_id: id });
        };

        let waiters = {
            let mut dep_state = entry.dep_state.lock().expect("dep_state poisoned");
            dep_state.status = TaskStatus::Done;
            std::mem::take(&mut dep_state.waiters)
        };

        use crate::handle::AccessMode;
        for binding in &entry.task.bindings {
            if binding.mode == AccessMode::Scratch {
                continue;
            }
            if let Some(handle) = &binding.handle {
                handle.release_request(RequestorId::Task(id));
            }
        }

        tracing::debug!(task_id = %id, waiters = waiters.len(), "task done");
        for waiter in waiters {
            self.try_promote(waiter);
        }
        Ok(())
    }

    pub fn mark_running(&self, id: TaskId) {
        if let Some(entry) = self.tasks.get(&id) {
            entry.dep_state.lock().expect("dep_state poisoned").status = TaskStatus::Running;
        }
    }

    pub fn mark_failed(&self, id: TaskId) {
        if let Some(entry) = self.tasks.get(&id) {
            entry.dep_state.lock().expect("dep_state poisoned").status = TaskStatus::Failed;
        }
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.tasks.get(&id).map(|e| e.snapshot())
    }

    /// Application-initiated acquire: `attempt_to_submit_data_request_from_apps`.
    /// Enqueues a synthetic request directly on the handle's FIFO, bypassing
    /// the task table entirely; returns the requestor id the caller must
    /// pass back to `release`.
    pub fn app_acquire(
        &self,
        handle: &crate::handle::DataHandle,
        mode: crate::handle::AccessMode,
        cb: impl FnOnce() + Send + 'static,
    ) -> u64 {
        let req_id = self.next_app_request.fetch_add(1, Ordering::Relaxed);
        handle.submit_request(RequestorId::App(req_id), mode, cb);
        req_id
    }

    pub fn app_release(&self, handle: &crate::handle::DataHandle, req_id: u64) {
        handle.release_request(RequestorId::App(req_id));
    }
}

impl Default for DependencyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{AccessMode, DataHandle};
    use crate::task::TaskBuilder;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    fn ready_collector() -> (ReadyHandler, Arc<StdMutex<Vec<TaskId>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        let handler: ReadyHandler = Arc::new(move |task| {
            seen2.lock().unwrap().push(task.id);
        });
        (handler, seen)
    }

    #[test]
    fn control_task_with_no_bindings_is_immediately_ready() {
        let (handler, seen) = ready_collector();
        let engine = DependencyEngine::new();
        engine.set_ready_handler(handler);
        let task = Arc::new(TaskBuilder::new("ctrl").build());
        engine.submit(task.clone()).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![task.id]);
    }

    #[test]
    fn explicit_dep_blocks_until_predecessor_completes() {
        let (handler, seen) = ready_collector();
        let engine = DependencyEngine::new();
        engine.set_ready_handler(handler);

        let a = Arc::new(TaskBuilder::new("a").build());
        engine.submit(a.clone()).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![a.id]);

        let b = Arc::new(TaskBuilder::new("b").depends_on([a.id]).build());
        engine.submit(b.clone()).unwrap();
        // b must not be ready yet: a hasn't completed.
        assert_eq!(*seen.lock().unwrap(), vec![a.id]);

        engine.complete(a.id).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![a.id, b.id]);
    }

    #[test]
    fn write_binding_gates_readiness_on_handle_fifo() {
        let (handler, seen) = ready_collector();
        let engine = DependencyEngine::new();
        engine.set_ready_handler(handler);
        let h = DataHandle::new(-1);

        let a = Arc::new(TaskBuilder::new("a").handle(h.clone(), AccessMode::Write).build());
        let b = Arc::new(TaskBuilder::new("b").handle(h.clone(), AccessMode::Write).build());
        engine.submit(a.clone()).unwrap();
        engine.submit(b.clone()).unwrap();

        // Only a is ready; b waits behind it in the handle's FIFO.
        assert_eq!(*seen.lock().unwrap(), vec![a.id]);

        engine.complete(a.id).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![a.id, b.id]);
    }

    #[test]
    fn null_handle_on_write_is_rejected() {
        let (handler, _seen) = ready_collector();
        let engine = DependencyEngine::new();
        engine.set_ready_handler(handler);
        let task = Arc::new(TaskBuilder::new("bad").null_handle(AccessMode::Write).build());
        let err = engine.submit(task.clone()).unwrap_err();
        assert!(matches!(err, Error::NullHandleOnWrite { task_id } if task_id == task.id));
    }

    #[test]
    fn duplicate_submit_is_rejected() {
        let (handler, _seen) = ready_collector();
        let engine = DependencyEngine::new();
        engine.set_ready_handler(handler);
        let task = Arc::new(TaskBuilder::new("dup").build());
        engine.submit(task.clone()).unwrap();
        let err = engine.submit(task.clone()).unwrap_err();
        assert!(matches!(err, Error::DuplicateSubmit { task_id } if task_id == task.id));
    }

    #[test]
    fn app_acquire_and_release_round_trip() {
        let (handler, _seen) = ready_collector();
        let engine = DependencyEngine::new();
        engine.set_ready_handler(handler);
        let h = DataHandle::new(-1);
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let req = engine.app_acquire(&h, AccessMode::Write, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        engine.app_release(&h, req);
    }
}
