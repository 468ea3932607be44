//! Data handles: opaque identities for logically shared data buffers, and
//! the unit of dependency tracking.
//!
//! The memory-node coherency engine itself (`fetch`/`prefetch`/`acquire`/
//! `release`) is an external collaborator per the purpose & scope section;
//! this module owns only the per-handle FIFO of pending access requests that
//! the dependency engine enforces ordering through.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::TaskId;

pub type HandleId = Uuid;

/// The access mode a task declares on a handle binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
    /// Ephemeral, per-invocation private buffer. Neither waits nor blocks
    /// others; does not participate in FIFO ordering.
    Scratch,
}

impl AccessMode {
    /// Whether this mode requires exclusive access to the handle (breaks a
    /// run of coalesced reads).
    pub fn is_exclusive(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// Identifies who is asking to access a handle: a task going through the
/// dependency engine, or application code calling `data_acquire` directly
/// (the sole mechanism by which non-task code temporarily holds a handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestorId {
    Task(TaskId),
    App(u64),
}

struct PendingRequest {
    requestor: RequestorId,
    mode: AccessMode,
    callback: Option<Box<dyn FnOnce() + Send>>,
}

struct QueueState {
    queue: VecDeque<PendingRequest>,
    active: Vec<RequestorId>,
    active_mode: Option<AccessMode>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            active: Vec::new(),
            active_mode: None,
        }
    }
}

struct HandleState {
    owner_rank: AtomicI64,
    sequential_consistency: AtomicBool,
    queue: Mutex<QueueState>,
}

/// An opaque identity for a logically shared data buffer.
///
/// Cheaply cloneable; clones refer to the same underlying FIFO and
/// coherency metadata.
#[derive(Clone)]
pub struct DataHandle {
    id: HandleId,
    state: Arc<HandleState>,
}

impl DataHandle {
    /// `owner_rank = -1` means replicated/unknown, matching the data model.
    pub fn new(owner_rank: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Arc::new(HandleState {
                owner_rank: AtomicI64::new(owner_rank),
                sequential_consistency: AtomicBool::new(true),
                queue: Mutex::new(QueueState::new()),
            }),
        }
    }

    pub fn with_sequential_consistency(self, enabled: bool) -> Self {
        self.state
            .sequential_consistency
            .store(enabled, Ordering::Release);
        self
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn owner_rank(&self) -> i64 {
        self.state.owner_rank.load(Ordering::Acquire)
    }

    pub fn set_owner_rank(&self, rank: i64) {
        self.state.owner_rank.store(rank, Ordering::Release);
    }

    pub fn sequential_consistency(&self) -> bool {
        self.state.sequential_consistency.load(Ordering::Acquire)
    }

    /// Enqueue a request onto this handle's FIFO. If consistency is
    /// disabled, the request bypasses the FIFO entirely and the callback
    /// fires immediately. Scratch accesses never reach this path -- callers
    /// should special-case them before calling `submit_request`.
    pub fn submit_request(
        &self,
        requestor: RequestorId,
        mode: AccessMode,
        callback: impl FnOnce() + Send + 'static,
    ) {
        debug_assert!(mode != AccessMode::Scratch, "scratch bypasses the FIFO");

        if !self.sequential_consistency() {
            callback();
            return;
        }

        let mut to_fire: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
        {
            let mut state = self.state.queue.lock().expect("handle queue poisoned");
            state.queue.push_back(PendingRequest {
                requestor,
                mode,
                callback: Some(Box::new(callback)),
            });
            Self::promote_locked(&mut state, &mut to_fire);
        }
        for cb in to_fire {
            cb();
        }
    }

    /// Pop `requestor`'s own request from the active set (or, if it never
    /// became active, from the pending queue) and re-evaluate the new head.
    /// Idempotent under duplicate calls for the same requestor.
    pub fn release_request(&self, requestor: RequestorId) {
        if !self.sequential_consistency() {
            return;
        }

        let mut to_fire: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
        {
            let mut state = self.state.queue.lock().expect("handle queue poisoned");
            let was_active = if let Some(pos) = state.active.iter().position(|r| *r == requestor) {
                state.active.remove(pos);
                true
            } else {
                false
            };
            if !was_active {
                state.queue.retain(|r| r.requestor != requestor);
            }
            if state.active.is_empty() {
                state.active_mode = None;
            }
            Self::promote_locked(&mut state, &mut to_fire);
        }
        for cb in to_fire {
            cb();
        }
    }

    /// Grant every request at the head of the queue that the read-coalescing
    /// rule allows, collecting callbacks to run once the lock is released.
    fn promote_locked(state: &mut QueueState, to_fire: &mut Vec<Box<dyn FnOnce() + Send>>) {
        loop {
            let can_grant = match (&state.active_mode, state.queue.front()) {
                (None, Some(_)) => true,
                (Some(AccessMode::Read), Some(front)) => !front.mode.is_exclusive(),
                (Some(_), Some(_)) => false,
                (_, None) => false,
            };
            if !can_grant {
                break;
            }
            let Some(mut req) = state.queue.pop_front() else {
                break;
            };
            state.active.push(req.requestor);
            state.active_mode = Some(if req.mode.is_exclusive() {
                req.mode
            } else {
                AccessMode::Read
            });
            if let Some(cb) = req.callback.take() {
                to_fire.push(cb);
            }
        }
    }
}

impl PartialEq for DataHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for DataHandle {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_cb(counter: Arc<AtomicU32>) -> impl FnOnce() + Send + 'static {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn consecutive_reads_coalesce() {
        let h = DataHandle::new(-1);
        let fired = Arc::new(AtomicU32::new(0));

        h.submit_request(RequestorId::App(1), AccessMode::Read, counting_cb(fired.clone()));
        h.submit_request(RequestorId::App(2), AccessMode::Read, counting_cb(fired.clone()));
        h.submit_request(RequestorId::App(3), AccessMode::Read, counting_cb(fired.clone()));

        // All three reads run concurrently.
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn write_breaks_read_run_and_waits() {
        let h = DataHandle::new(-1);
        let fired = Arc::new(AtomicU32::new(0));

        h.submit_request(RequestorId::App(1), AccessMode::Read, counting_cb(fired.clone()));
        h.submit_request(RequestorId::App(2), AccessMode::Write, counting_cb(fired.clone()));
        // The write must wait for the outstanding read.
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        h.release_request(RequestorId::App(1));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fifo_order_preserved_under_sequential_consistency() {
        let h = DataHandle::new(-1);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3u64 {
            let order = order.clone();
            h.submit_request(RequestorId::App(i), AccessMode::Write, move || {
                order.lock().unwrap().push(i);
            });
        }
        // Only the first write is active; the other two wait in the FIFO.
        assert_eq!(*order.lock().unwrap(), vec![0]);

        h.release_request(RequestorId::App(0));
        assert_eq!(*order.lock().unwrap(), vec![0, 1]);

        h.release_request(RequestorId::App(1));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

        h.release_request(RequestorId::App(2));
    }

    #[test]
    fn consistency_bypass_grants_immediately() {
        let h = DataHandle::new(-1).with_sequential_consistency(false);
        let fired = Arc::new(AtomicU32::new(0));

        h.submit_request(RequestorId::App(1), AccessMode::Write, counting_cb(fired.clone()));
        h.submit_request(RequestorId::App(2), AccessMode::Write, counting_cb(fired.clone()));

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn idempotent_release_is_a_no_op() {
        let h = DataHandle::new(-1);
        let fired = Arc::new(AtomicU32::new(0));
        h.submit_request(RequestorId::App(1), AccessMode::Write, counting_cb(fired.clone()));
        h.release_request(RequestorId::App(1));
        h.release_request(RequestorId::App(1));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
