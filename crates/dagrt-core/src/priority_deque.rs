//! Priority deque: a per-policy multi-priority task container.
//!
//! A resizable array of `{priority, task_list}` buckets kept sorted by
//! descending priority. `ntasks` is always the sum of list lengths; no two
//! buckets share a priority; destruction requires every list to be empty.
//! Grounded on `original_source/src/sched_policies/prio_deque.c`, reworked
//! per the design notes' guidance to replace intrusive list pointers with
//! an index-free `VecDeque` per bucket.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::task::Task;
use crate::worker::DeviceKind;

struct Bucket {
    priority: i32,
    items: VecDeque<Arc<Task>>,
}

/// Sparse, descending-priority array of task buckets.
pub struct PriorityDeque {
    buckets: Vec<Bucket>,
    ntasks: usize,
}

impl PriorityDeque {
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            ntasks: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ntasks
    }

    pub fn is_empty(&self) -> bool {
        self.ntasks == 0
    }

    /// Insert a new bucket in descending-priority position if one for
    /// `priority` does not already exist, and return its index.
    fn bucket_index_for(&mut self, priority: i32) -> usize {
        match self.buckets.iter().position(|b| b.priority == priority) {
            Some(idx) => idx,
            None => {
                let idx = self
                    .buckets
                    .iter()
                    .position(|b| b.priority < priority)
                    .unwrap_or(self.buckets.len());
                self.buckets.insert(
                    idx,
                    Bucket {
                        priority,
                        items: VecDeque::new(),
                    },
                );
                idx
            }
        }
    }

    /// Append `task` to the tail of its priority bucket's list.
    pub fn push(&mut self, task: Arc<Task>) {
        let idx = self.bucket_index_for(task.priority);
        self.buckets[idx].items.push_back(task);
        self.ntasks += 1;
    }

    /// Scan buckets high -> low; the first bucket with a task matching
    /// `predicate` yields its head (oldest-pushed) element.
    pub fn pop_matching(&mut self, predicate: impl Fn(&Task) -> bool) -> Option<Arc<Task>> {
        for bucket in &mut self.buckets {
            if let Some(idx) = bucket.items.iter().position(|t| predicate(t)) {
                let task = bucket.items.remove(idx).expect("index just located");
                self.ntasks -= 1;
                return Some(task);
            }
        }
        None
    }

    /// Highest-priority-first pop; the default predicate accepts all tasks.
    pub fn pop(&mut self) -> Option<Arc<Task>> {
        self.pop_matching(|_| true)
    }

    /// Same as [`PriorityDeque::pop`] but the predicate requires at least
    /// one implementation of the task's codelet to be executable on
    /// `device_kind`.
    pub fn pop_for_worker(&mut self, device_kind: DeviceKind) -> Option<Arc<Task>> {
        self.pop_matching(|t| {
            t.codelet
                .as_ref()
                .is_some_and(|c| c.can_execute_on(device_kind))
        })
    }

    /// Symmetric scan from the low-priority side: buckets low -> high,
    /// serving the tail (most-recently-pushed) task of the first matching
    /// bucket. Used by stealing policies.
    pub fn deque_matching(&mut self, predicate: impl Fn(&Task) -> bool) -> Option<Arc<Task>> {
        for bucket in self.buckets.iter_mut().rev() {
            if let Some(idx) = bucket.items.iter().rposition(|t| predicate(t)) {
                let task = bucket.items.remove(idx).expect("index just located");
                self.ntasks -= 1;
                return Some(task);
            }
        }
        None
    }

    pub fn deque(&mut self) -> Option<Arc<Task>> {
        self.deque_matching(|_| true)
    }

    pub fn deque_for_worker(&mut self, device_kind: DeviceKind) -> Option<Arc<Task>> {
        self.deque_matching(|t| {
            t.codelet
                .as_ref()
                .is_some_and(|c| c.can_execute_on(device_kind))
        })
    }
}

impl Default for PriorityDeque {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PriorityDeque {
    /// Destroying a priority deque with `ntasks != 0` is a programming
    /// error: logged and fatal, per the error handling design's
    /// `InvariantViolated` kind.
    fn drop(&mut self) {
        if self.ntasks != 0 {
            tracing::error!(
                ntasks = self.ntasks,
                "priority deque destroyed while non-empty"
            );
            if !std::thread::panicking() {
                panic!("priority deque destroyed with {} pending tasks", self.ntasks);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codelet::Codelet;
    use crate::task::TaskBuilder;
    use std::sync::Arc;

    fn plain_task(priority: i32) -> Arc<Task> {
        Arc::new(TaskBuilder::new("t").priority(priority).build())
    }

    #[test]
    fn invariant_ntasks_matches_bucket_lengths() {
        let mut d = PriorityDeque::new();
        d.push(plain_task(5));
        d.push(plain_task(1));
        d.push(plain_task(5));
        assert_eq!(d.len(), 3);
        d.pop();
        assert_eq!(d.len(), 2);
        d.pop();
        d.pop();
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn priority_fairness_scenario() {
        // push {5, 1, 5}; pop three times returns
        // [first-pushed prio-5, second-pushed prio-5, prio-1].
        let mut d = PriorityDeque::new();
        let a = plain_task(5);
        let b = plain_task(1);
        let c = plain_task(5);
        d.push(a.clone());
        d.push(b.clone());
        d.push(c.clone());

        let first = d.pop().unwrap();
        let second = d.pop().unwrap();
        let third = d.pop().unwrap();

        assert!(Arc::ptr_eq(&first, &a));
        assert!(Arc::ptr_eq(&second, &c));
        assert!(Arc::ptr_eq(&third, &b));
    }

    #[test]
    fn worker_eligibility_filters_pop() {
        let mut d = PriorityDeque::new();
        let gpu_codelet = Arc::new(
            Codelet::builder("gpu-only")
                .implementation(
                    DeviceKind::Gpu,
                    Arc::new(|| Box::pin(async { Ok(()) })),
                )
                .build(),
        );
        let task = Arc::new(
            TaskBuilder::new("gpu-task")
                .codelet(gpu_codelet)
                .priority(0)
                .build(),
        );
        d.push(task.clone());

        assert!(d.pop_for_worker(DeviceKind::Cpu).is_none());
        let popped = d.pop_for_worker(DeviceKind::Gpu).unwrap();
        assert!(Arc::ptr_eq(&popped, &task));
    }

    #[test]
    #[should_panic(expected = "pending tasks")]
    fn destroying_nonempty_deque_panics() {
        let mut d = PriorityDeque::new();
        d.push(plain_task(0));
        drop(d);
    }
}
