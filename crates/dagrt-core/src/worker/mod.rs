//! A worker: a thread bound to one compute device and one memory node.
//!
//! Each worker owns a local queue, a wakeup `Notify` standing in for the
//! condition variable in the data model, and drives the dispatch loop
//! described in the component design. The loop itself lives in
//! [`crate::dispatch`], which needs both a worker and the dependency engine
//! to run; this module owns only the worker's own state.

pub mod combined;

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::task::Task;
use std::sync::Arc;

pub use combined::{CombinedExecState, CombinedWorker, TaskAlias};

/// Identifies a worker. Values `>= N_basic` (the number of basic workers at
/// machine setup) identify a combined worker.
pub type WorkerId = u32;
pub type MemoryNodeId = u32;

/// The device kind a worker is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Remote,
}

/// A unit of work sitting in a worker's local queue: either the task itself,
/// or an alias of a task pushed to a combined worker.
pub enum WorkItem {
    Task(Arc<Task>),
    Alias(Arc<TaskAlias>),
}

impl WorkItem {
    pub fn task(&self) -> &Arc<Task> {
        match self {
            WorkItem::Task(t) => t,
            WorkItem::Alias(a) => &a.original,
        }
    }
}

/// A basic worker: one thread, one device, one memory node, one local
/// queue/mutex/cond triple.
pub struct Worker {
    pub id: WorkerId,
    pub device_kind: DeviceKind,
    pub memory_node_id: MemoryNodeId,
    queue: Mutex<VecDeque<WorkItem>>,
    notify: Notify,
}

impl Worker {
    pub fn new(id: WorkerId, device_kind: DeviceKind, memory_node_id: MemoryNodeId) -> Self {
        Self {
            id,
            device_kind,
            memory_node_id,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// `back = true` inserts at the tail (FIFO when every producer uses
    /// `back = true`); `back = false` inserts at the head (LIFO when every
    /// producer uses `back = false`).
    pub fn push_local(&self, item: WorkItem, back: bool) {
        let mut queue = self.queue.lock().expect("worker queue mutex poisoned");
        if back {
            queue.push_back(item);
        } else {
            queue.push_front(item);
        }
        drop(queue);
        self.notify.notify_one();
    }

    pub fn pop_local(&self) -> Option<WorkItem> {
        self.queue
            .lock()
            .expect("worker queue mutex poisoned")
            .pop_front()
    }

    pub fn is_local_empty(&self) -> bool {
        self.queue.lock().expect("worker queue mutex poisoned").is_empty()
    }

    /// Suspend until new local work arrives or the runtime wakes this
    /// worker for an unrelated reason (e.g. shutdown).
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    /// Wake this worker without pushing work, used for shutdown signaling.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}
