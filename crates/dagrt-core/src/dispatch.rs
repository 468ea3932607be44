//! The dispatcher: the generic façade users and the dependency engine call
//! to enqueue a ready task, and the entry point a worker calls to fetch one.
//!
//! Grounded on `original_source/src/core/sched_policy.c`'s
//! `_starpu_push_task` / `_starpu_push_task_on_specific_worker` /
//! `_starpu_pop_task` / `_starpu_sched_post_exec_hook`.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;

use crate::deps::DependencyEngine;
use crate::error::{Error, Result};
use crate::handle::AccessMode;
use crate::memory::MemoryCoherencyOps;
use crate::sched::SchedPolicy;
use crate::task::{Profiling, Task, TaskId};
use crate::worker::{CombinedWorker, TaskAlias, Worker, WorkItem, WorkerId};

/// Whether a task's placement came from the policy or a pinned worker id;
/// `post_exec_hook` is only forwarded to the policy in the former case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Policy,
    Pinned,
}

pub struct Dispatcher {
    policy: Arc<dyn SchedPolicy>,
    deps: DependencyEngine,
    coherency: Arc<dyn MemoryCoherencyOps>,
    workers: DashMap<WorkerId, Arc<Worker>>,
    combined_workers: DashMap<WorkerId, Arc<CombinedWorker>>,
    profiling: DashMap<TaskId, Mutex<Profiling>>,
    placement: DashMap<TaskId, Placement>,
    prefetch_enabled: bool,
}

impl Dispatcher {
    pub fn new(
        policy: Arc<dyn SchedPolicy>,
        deps: DependencyEngine,
        coherency: Arc<dyn MemoryCoherencyOps>,
        prefetch_enabled: bool,
    ) -> Self {
        Self {
            policy,
            deps,
            coherency,
            workers: DashMap::new(),
            combined_workers: DashMap::new(),
            profiling: DashMap::new(),
            placement: DashMap::new(),
            prefetch_enabled,
        }
    }

    pub fn register_worker(&self, worker: Arc<Worker>) {
        self.workers.insert(worker.id, worker);
    }

    pub fn register_combined_worker(&self, combined: Arc<CombinedWorker>) {
        self.combined_workers.insert(combined.id, combined);
    }

    /// Whether any currently registered basic worker could ever run this
    /// task's codelet. A control task (no codelet) always passes -- it never
    /// touches a device.
    fn any_worker_can_execute(&self, task: &Task) -> bool {
        let Some(codelet) = &task.codelet else {
            return true;
        };
        self.workers.iter().any(|w| codelet.can_execute_on(w.device_kind))
    }

    pub fn profiling_snapshot(&self, task_id: TaskId) -> Option<Profiling> {
        self.profiling.get(&task_id).map(|p| *p.lock().expect("profiling mutex poisoned"))
    }

    /// `push(task)`: the entry point a ready task is handed to (this is the
    /// `on_ready` callback the dependency engine invokes).
    pub fn push(&self, task: Arc<Task>) -> Result<()> {
        self.profiling
            .entry(task.id)
            .or_insert_with(|| Mutex::new(Profiling::default()))
            .lock()
            .expect("profiling mutex poisoned")
            .push_start = Some(Instant::now());

        let result = if task.is_control() {
            self.run_control_task(&task);
            Ok(())
        } else if let Some(worker_id) = task.pinned_worker {
            self.placement.insert(task.id, Placement::Pinned);
            self.push_on_specific_worker(task.clone(), worker_id)
        } else if !self.any_worker_can_execute(&task) {
            Err(Error::NoDevice { task_id: task.id })
        } else {
            self.placement.insert(task.id, Placement::Policy);
            self.policy.push_task(task.clone())
        };

        if let Some(p) = self.profiling.get(&task.id) {
            p.lock().expect("profiling mutex poisoned").push_end = Some(Instant::now());
        }
        result
    }

    /// A task with no codelet: run its callback and resolve dependents
    /// immediately, without ever touching a worker queue.
    fn run_control_task(&self, task: &Arc<Task>) {
        if let Some(callback) = &task.callback {
            callback();
        }
        if let Err(err) = self.deps.complete(task.id) {
            tracing::warn!(task_id = %task.id, error = %err, "control task completion failed");
        }
    }

    pub fn push_on_specific_worker(&self, task: Arc<Task>, worker_id: WorkerId) -> Result<()> {
        if let Some(worker) = self.workers.get(&worker_id).map(|w| w.clone()) {
            if let Some(codelet) = &task.codelet {
                if !codelet.can_execute_on(worker.device_kind) {
                    return Err(Error::NoDevice { task_id: task.id });
                }
            }
            if self.prefetch_enabled {
                self.prefetch_inputs(&task, worker.memory_node_id);
            }
            worker.push_local(WorkItem::Task(task), true);
            return Ok(());
        }

        if let Some(combined) = self.combined_workers.get(&worker_id).map(|c| c.clone()) {
            if let Some(codelet) = &task.codelet {
                let all_eligible = combined.member_ids.iter().all(|member_id| {
                    self.workers
                        .get(member_id)
                        .is_some_and(|w| codelet.can_execute_on(w.device_kind))
                });
                if !all_eligible {
                    return Err(Error::NoDevice { task_id: task.id });
                }
            }
            if self.prefetch_enabled {
                self.prefetch_inputs(&task, combined.memory_node_id);
            }
            let exec_state = Arc::new(crate::worker::CombinedExecState::new(
                worker_id,
                combined.worker_size,
            ));
            for member_id in &combined.member_ids {
                let Some(member) = self.workers.get(member_id).map(|w| w.clone()) else {
                    return Err(Error::WorkerNotFound { worker_id: *member_id });
                };
                let alias = Arc::new(TaskAlias {
                    original: task.clone(),
                    combined: exec_state.clone(),
                });
                member.push_local(WorkItem::Alias(alias), true);
            }
            return Ok(());
        }

        Err(Error::WorkerNotFound { worker_id })
    }

    fn prefetch_inputs(&self, task: &Task, memory_node: crate::worker::MemoryNodeId) {
        for binding in &task.bindings {
            if matches!(binding.mode, AccessMode::Read | AccessMode::ReadWrite) {
                if let Some(handle) = &binding.handle {
                    self.coherency.prefetch(handle, memory_node);
                }
            }
        }
    }

    /// `pop(worker)`: consult the worker's own local queue first, then fall
    /// back to the policy.
    pub fn pop(&self, worker: &Worker) -> Option<WorkItem> {
        let pop_start = Instant::now();

        let item = match worker.pop_local() {
            Some(item) => Some(item),
            None => self
                .policy
                .pop_task(worker.id, worker.device_kind)
                .map(WorkItem::Task),
        };

        if let Some(item) = &item {
            let task_id = item.task().id;
            if let Some(p) = self.profiling.get(&task_id) {
                let mut p = p.lock().expect("profiling mutex poisoned");
                p.pop_start = Some(pop_start);
                p.pop_end = Some(Instant::now());
            }
        }
        item
    }

    /// Invoked only if the task was placed by the policy (not pinned).
    pub fn post_exec_hook(&self, task: &Task) {
        if self.placement.get(&task.id).map(|p| *p) == Some(Placement::Policy) {
            self.policy.post_exec_hook(task);
        }
    }

    /// Run a task's device kernel (an external collaborator per the
    /// purpose & scope section -- the kernel itself is an opaque async
    /// closure) and drive the dependency engine's completion path.
    pub async fn run_and_complete(&self, task: Arc<Task>, device_kind: crate::worker::DeviceKind) {
        self.deps.mark_running(task.id);
        let Some(codelet) = &task.codelet else {
            // Control tasks never reach here: the dispatcher resolves them
            // in `push` before they touch a worker queue.
            return;
        };
        let outcome = match codelet.kernel_for(device_kind, 0) {
            Some(kernel) => kernel().await,
            None => Err(format!("no implementation for {device_kind:?}")),
        };
        match outcome {
            Ok(()) => {
                if let Some(callback) = &task.callback {
                    callback();
                }
                self.post_exec_hook(&task);
                if let Err(err) = self.deps.complete(task.id) {
                    tracing::warn!(task_id = %task.id, error = %err, "task completion failed");
                }
            }
            Err(reason) => {
                tracing::error!(task_id = %task.id, %reason, "task kernel failed");
                self.deps.mark_failed(task.id);
            }
        }
    }

    /// Handle the combined-worker alias path: wait on the entry barrier,
    /// run the kernel once per member (idempotent kernels are assumed, as
    /// for any SPMD collective task), wait on the exit barrier, and let
    /// exactly one alias drive completion.
    pub async fn run_alias_and_complete(&self, alias: Arc<TaskAlias>, device_kind: crate::worker::DeviceKind) {
        alias.combined.entry_barrier.wait().await;

        self.deps.mark_running(alias.original.id);
        if let Some(codelet) = &alias.original.codelet {
            if let Some(kernel) = codelet.kernel_for(device_kind, 0) {
                if let Err(reason) = kernel().await {
                    tracing::error!(task_id = %alias.original.id, %reason, "combined task kernel failed");
                }
            }
        }

        let wait_result = alias.combined.exit_barrier.wait().await;
        if wait_result.is_leader() {
            if let Some(callback) = &alias.original.callback {
                callback();
            }
            self.post_exec_hook(&alias.original);
            if let Err(err) = self.deps.complete(alias.original.id) {
                tracing::warn!(task_id = %alias.original.id, error = %err, "combined task completion failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InProcessCoherency;
    use crate::sched::policies::Eager;
    use crate::task::TaskBuilder;
    use crate::worker::DeviceKind;

    fn dispatcher_with_eager() -> (Arc<Dispatcher>, DependencyEngine) {
        let policy: Arc<dyn SchedPolicy> = Arc::new(Eager::new());
        let deps = DependencyEngine::new();
        let dispatcher = Arc::new(Dispatcher::new(policy, deps.clone(), InProcessCoherency::new(), true));
        let d = dispatcher.clone();
        deps.set_ready_handler(Arc::new(move |task| {
            let _ = d.push(task);
        }));
        (dispatcher, deps)
    }

    #[test]
    fn control_task_runs_callback_and_completes_without_a_worker() {
        let (dispatcher, deps) = dispatcher_with_eager();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let r = ran.clone();
        let task = Arc::new(
            TaskBuilder::new("ctrl")
                .callback(move || r.store(true, Ordering::SeqCst))
                .build(),
        );
        deps.submit(task.clone()).unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(deps.snapshot(task.id).unwrap().status, crate::task::TaskStatus::Done);
    }

    #[test]
    fn pinned_task_goes_to_its_worker_not_the_policy() {
        let (dispatcher, deps) = dispatcher_with_eager();
        let worker = Arc::new(Worker::new(0, DeviceKind::Cpu, 0));
        dispatcher.register_worker(worker.clone());

        let codelet = Arc::new(
            crate::codelet::Codelet::builder("noop")
                .implementation(DeviceKind::Cpu, Arc::new(|| Box::pin(async { Ok(()) })))
                .build(),
        );
        let task = Arc::new(
            TaskBuilder::new("pinned")
                .codelet(codelet)
                .pin_to_worker(0)
                .build(),
        );
        deps.submit(task.clone()).unwrap();

        let item = dispatcher.pop(&worker).expect("task should be on worker 0's queue");
        assert_eq!(item.task().id, task.id);
    }

    #[test]
    fn pinning_a_task_to_a_worker_that_cannot_run_its_codelet_is_rejected() {
        let (dispatcher, _deps) = dispatcher_with_eager();
        let worker = Arc::new(Worker::new(0, DeviceKind::Cpu, 0));
        dispatcher.register_worker(worker.clone());

        let gpu_only = Arc::new(
            crate::codelet::Codelet::builder("gpu-only")
                .implementation(DeviceKind::Gpu, Arc::new(|| Box::pin(async { Ok(()) })))
                .build(),
        );
        let task = Arc::new(
            TaskBuilder::new("wrong-device")
                .codelet(gpu_only)
                .pin_to_worker(0)
                .build(),
        );
        let err = dispatcher.push_on_specific_worker(task.clone(), 0).unwrap_err();
        assert!(matches!(err, Error::NoDevice { task_id } if task_id == task.id));
    }

    #[test]
    fn policy_push_is_rejected_when_no_registered_worker_can_run_the_codelet() {
        let (dispatcher, _deps) = dispatcher_with_eager();
        let worker = Arc::new(Worker::new(0, DeviceKind::Gpu, 0));
        dispatcher.register_worker(worker);

        let cpu_only = Arc::new(
            crate::codelet::Codelet::builder("cpu-only")
                .implementation(DeviceKind::Cpu, Arc::new(|| Box::pin(async { Ok(()) })))
                .build(),
        );
        let task = Arc::new(TaskBuilder::new("no-gpu-worker").codelet(cpu_only).build());
        let err = dispatcher.push(task.clone()).unwrap_err();
        assert!(matches!(err, Error::NoDevice { task_id } if task_id == task.id));
    }
}
