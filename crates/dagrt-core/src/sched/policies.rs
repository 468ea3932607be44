//! Concrete scheduling policies.
//!
//! Five are genuinely distinct: `eager` (default), `prio`, `no-prio`,
//! `random`, `ws`. The remaining seven named policies (`dm`, `dmda`,
//! `dmda-ready`, `dmda-sorted`, `heft`, `parallel-heft`, `pgreedy`) need a
//! calibrated per-worker performance model, which is out of scope here;
//! they are registered under their real names via [`Delegating`], which
//! forwards to an inner `eager` instance rather than silently reusing the
//! same struct under an alias.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rand::Rng;

use crate::error::Result;
use crate::priority_deque::PriorityDeque;
use crate::task::Task;
use crate::worker::{DeviceKind, WorkerId};

use super::SchedPolicy;

fn is_eligible(task: &Task, device_kind: DeviceKind) -> bool {
    task.codelet
        .as_ref()
        .is_some_and(|c| c.can_execute_on(device_kind))
}

/// Single central FIFO queue; any idle worker takes the oldest eligible
/// task. The default policy when `DAGRT_SCHED` is unset.
pub struct Eager {
    queue: Mutex<VecDeque<Arc<Task>>>,
}

impl Eager {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl SchedPolicy for Eager {
    fn name(&self) -> &'static str {
        "eager"
    }
    fn description(&self) -> &'static str {
        "greedy policy: a central FIFO, first idle worker takes the next eligible task"
    }
    fn push_task(&self, task: Arc<Task>) -> Result<()> {
        self.queue.lock().expect("eager queue poisoned").push_back(task);
        Ok(())
    }
    fn pop_task(&self, _worker_id: WorkerId, device_kind: DeviceKind) -> Option<Arc<Task>> {
        let mut queue = self.queue.lock().expect("eager queue poisoned");
        let idx = queue.iter().position(|t| is_eligible(t, device_kind))?;
        queue.remove(idx)
    }
    fn pop_every_task(&self) -> Vec<Arc<Task>> {
        self.queue.lock().expect("eager queue poisoned").iter().cloned().collect()
    }
}

/// Same central queue as `eager` but LIFO: the most recently pushed
/// eligible task runs next. Distinguishes "no priority support" (this
/// policy never looks at `task.priority`) from `eager`'s FIFO order.
pub struct NoPrio {
    queue: Mutex<VecDeque<Arc<Task>>>,
}

impl NoPrio {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl SchedPolicy for NoPrio {
    fn name(&self) -> &'static str {
        "no-prio"
    }
    fn description(&self) -> &'static str {
        "central stack ignoring task priority: most recently pushed eligible task runs next"
    }
    fn push_task(&self, task: Arc<Task>) -> Result<()> {
        self.queue.lock().expect("no-prio queue poisoned").push_front(task);
        Ok(())
    }
    fn pop_task(&self, _worker_id: WorkerId, device_kind: DeviceKind) -> Option<Arc<Task>> {
        let mut queue = self.queue.lock().expect("no-prio queue poisoned");
        let idx = queue.iter().position(|t| is_eligible(t, device_kind))?;
        queue.remove(idx)
    }
}

/// Priority-bucketed central queue, backed by [`PriorityDeque`].
pub struct Prio {
    deque: Mutex<PriorityDeque>,
}

impl Prio {
    pub fn new() -> Self {
        Self {
            deque: Mutex::new(PriorityDeque::new()),
        }
    }
}

impl SchedPolicy for Prio {
    fn name(&self) -> &'static str {
        "prio"
    }
    fn description(&self) -> &'static str {
        "central priority-bucketed queue, highest priority and oldest submission first"
    }
    fn push_task(&self, task: Arc<Task>) -> Result<()> {
        self.deque.lock().expect("prio deque poisoned").push(task);
        Ok(())
    }
    fn push_prio_task(&self, task: Arc<Task>) -> Result<()> {
        self.push_task(task)
    }
    fn pop_task(&self, _worker_id: WorkerId, device_kind: DeviceKind) -> Option<Arc<Task>> {
        self.deque
            .lock()
            .expect("prio deque poisoned")
            .pop_for_worker(device_kind)
    }
}

/// Picks a uniformly random eligible task from a central pool on every pop.
pub struct Random {
    pool: Mutex<Vec<Arc<Task>>>,
}

impl Random {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
        }
    }
}

impl SchedPolicy for Random {
    fn name(&self) -> &'static str {
        "random"
    }
    fn description(&self) -> &'static str {
        "central pool, each pop selects a uniformly random eligible task"
    }
    fn push_task(&self, task: Arc<Task>) -> Result<()> {
        self.pool.lock().expect("random pool poisoned").push(task);
        Ok(())
    }
    fn pop_task(&self, _worker_id: WorkerId, device_kind: DeviceKind) -> Option<Arc<Task>> {
        let mut pool = self.pool.lock().expect("random pool poisoned");
        let eligible: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, t)| is_eligible(t, device_kind))
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let pick = eligible[rand::thread_rng().gen_range(0..eligible.len())];
        Some(pool.remove(pick))
    }
}

/// Work-stealing: one local FIFO per worker, plus an overflow queue for
/// tasks pushed before any worker has registered itself (by calling
/// `pop_task` at least once). `pop_task` drains its own queue first, then
/// the overflow queue, then steals from the back of another worker's queue.
pub struct WorkStealing {
    overflow: Mutex<VecDeque<Arc<Task>>>,
    per_worker: DashMap<WorkerId, Mutex<VecDeque<Arc<Task>>>>,
    known_workers: Mutex<Vec<WorkerId>>,
    next_target: AtomicUsize,
}

impl WorkStealing {
    pub fn new() -> Self {
        Self {
            overflow: Mutex::new(VecDeque::new()),
            per_worker: DashMap::new(),
            known_workers: Mutex::new(Vec::new()),
            next_target: AtomicUsize::new(0),
        }
    }

    fn register(&self, worker_id: WorkerId) {
        if !self.per_worker.contains_key(&worker_id) {
            self.per_worker.insert(worker_id, Mutex::new(VecDeque::new()));
            self.known_workers.lock().expect("known_workers poisoned").push(worker_id);
        }
    }
}

impl SchedPolicy for WorkStealing {
    fn name(&self) -> &'static str {
        "ws"
    }
    fn description(&self) -> &'static str {
        "work-stealing: per-worker FIFOs, idle workers steal from the back of a peer's queue"
    }
    fn push_task(&self, task: Arc<Task>) -> Result<()> {
        let known = self.known_workers.lock().expect("known_workers poisoned");
        if known.is_empty() {
            drop(known);
            self.overflow.lock().expect("overflow poisoned").push_back(task);
            return Ok(());
        }
        let idx = self.next_target.fetch_add(1, Ordering::Relaxed) % known.len();
        let target = known[idx];
        drop(known);
        self.per_worker
            .get(&target)
            .expect("target worker registered")
            .lock()
            .expect("per-worker queue poisoned")
            .push_back(task);
        Ok(())
    }
    fn pop_task(&self, worker_id: WorkerId, device_kind: DeviceKind) -> Option<Arc<Task>> {
        self.register(worker_id);

        if let Some(own) = self.per_worker.get(&worker_id) {
            let mut own = own.lock().expect("per-worker queue poisoned");
            if let Some(idx) = own.iter().position(|t| is_eligible(t, device_kind)) {
                return own.remove(idx);
            }
        }

        {
            let mut overflow = self.overflow.lock().expect("overflow poisoned");
            if let Some(idx) = overflow.iter().position(|t| is_eligible(t, device_kind)) {
                return overflow.remove(idx);
            }
        }

        let known = self.known_workers.lock().expect("known_workers poisoned").clone();
        for peer in known {
            if peer == worker_id {
                continue;
            }
            if let Some(peer_queue) = self.per_worker.get(&peer) {
                let mut peer_queue = peer_queue.lock().expect("per-worker queue poisoned");
                if let Some(idx) = peer_queue.iter().rposition(|t| is_eligible(t, device_kind)) {
                    return peer_queue.remove(idx);
                }
            }
        }
        None
    }
}

/// A named policy that forwards every call to an inner `eager` instance.
/// Used for the seven performance-model-dependent policy names this system
/// does not implement a calibrated strategy for.
pub struct Delegating {
    name: &'static str,
    description: &'static str,
    inner: Eager,
}

impl Delegating {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            inner: Eager::new(),
        }
    }
}

impl SchedPolicy for Delegating {
    fn name(&self) -> &'static str {
        self.name
    }
    fn description(&self) -> &'static str {
        self.description
    }
    fn push_task(&self, task: Arc<Task>) -> Result<()> {
        self.inner.push_task(task)
    }
    fn pop_task(&self, worker_id: WorkerId, device_kind: DeviceKind) -> Option<Arc<Task>> {
        self.inner.pop_task(worker_id, device_kind)
    }
    fn pop_every_task(&self) -> Vec<Arc<Task>> {
        self.inner.pop_every_task()
    }
}
