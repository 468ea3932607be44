//! Combined workers: logical workers representing a set of basic workers
//! executing one task collectively.
//!
//! Pushing a task to a combined worker creates `worker_size` task aliases
//! synchronized by an entry barrier (all aliases must arrive before the
//! kernel runs) and an exit barrier (all aliases must arrive before
//! completion is reported). Aliases are modeled as references to the same
//! task descriptor sharing both barriers; exactly one alias is designated
//! `is_leader()` by the exit barrier, and that alias alone drives
//! completion.

use std::sync::Arc;

use tokio::sync::Barrier;

use super::{MemoryNodeId, WorkerId};
use crate::task::Task;

/// A logical worker made of several basic workers that execute one task
/// collectively.
pub struct CombinedWorker {
    pub id: WorkerId,
    pub member_ids: Vec<WorkerId>,
    pub memory_node_id: MemoryNodeId,
    pub worker_size: usize,
}

impl CombinedWorker {
    pub fn new(id: WorkerId, member_ids: Vec<WorkerId>, memory_node_id: MemoryNodeId) -> Self {
        let worker_size = member_ids.len();
        Self {
            id,
            member_ids,
            memory_node_id,
            worker_size,
        }
    }
}

/// State shared by every alias of a task pushed onto a combined worker.
pub struct CombinedExecState {
    pub combined_worker_id: WorkerId,
    pub task_size: usize,
    pub entry_barrier: Barrier,
    pub exit_barrier: Barrier,
}

impl CombinedExecState {
    pub fn new(combined_worker_id: WorkerId, worker_size: usize) -> Self {
        Self {
            combined_worker_id,
            task_size: worker_size,
            entry_barrier: Barrier::new(worker_size),
            exit_barrier: Barrier::new(worker_size),
        }
    }
}

/// One member's view of a task collectively executed by a combined worker.
pub struct TaskAlias {
    pub original: Arc<Task>,
    pub combined: Arc<CombinedExecState>,
}
