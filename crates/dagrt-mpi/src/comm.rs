//! The communication backend the shim posts detached sends/receives
//! through.
//!
//! Grounded on `original_source/mpi/starpu_mpi_insert_task.c`'s use of
//! `starpu_mpi_irecv_detached` / `starpu_mpi_isend_detached`: both are
//! fire-and-forget posts, never awaited by the caller past the point of
//! handing the request to the transport. `LocalCommBackend` is the
//! in-process reference transport, wiring a fixed set of ranks together
//! over `tokio::sync::mpsc` channels -- enough to drive the two-rank
//! owner-computes scenario without a real network.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;

use dagrt_core::handle::HandleId;

/// A detached send/receive transport, keyed by rank.
///
/// Both methods are async only because a real transport (sockets, RDMA)
/// would need to await buffer space or a connection; `LocalCommBackend`'s
/// own implementations never actually suspend.
#[async_trait::async_trait]
pub trait CommBackend: Send + Sync {
    /// Post a non-blocking send of `handle`'s data to `dest_rank`. Detached:
    /// the caller does not wait for the peer to consume it.
    async fn isend_detached(&self, handle: HandleId, dest_rank: i64);

    /// Post a non-blocking receive of `handle`'s data from `source_rank`.
    /// Detached: the caller does not block waiting for the transfer: the
    /// backend resolves it in the background and the handle becomes
    /// resident once it arrives.
    async fn irecv_detached(&self, handle: HandleId, source_rank: i64);
}

/// One envelope in flight: which rank sent it and which handle it concerns.
/// Payload transfer itself is out of scope (the memory coherency engine is
/// an external collaborator, per the purpose & scope) -- only the control
/// flow of "a send was posted" / "a receive was posted and later satisfied"
/// is modeled.
#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    pub source_rank: i64,
    pub handle: HandleId,
}

/// Wires a fixed set of ranks together in-process. Each rank gets a
/// [`LocalCommBackend`] whose sends land in the target rank's mailbox and
/// whose receives drain their own mailbox in the background.
pub struct LocalCommHub {
    senders: DashMap<i64, mpsc::UnboundedSender<Envelope>>,
}

impl LocalCommHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            senders: DashMap::new(),
        })
    }

    /// Mint a backend for `rank` and register it with the hub. Call once
    /// per rank before any `isend_detached`/`irecv_detached` targeting it.
    pub fn backend_for_rank(self: &Arc<Self>, rank: i64) -> Arc<LocalCommBackend> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(rank, tx);
        let received = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(LocalCommBackend {
            rank,
            hub: self.clone(),
            received: received.clone(),
        });
        tokio::spawn(Self::drain(rx, received));
        backend
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<Envelope>, received: Arc<Mutex<Vec<Envelope>>>) {
        while let Some(envelope) = rx.recv().await {
            received.lock().expect("received mailbox poisoned").push(envelope);
        }
    }
}

pub struct LocalCommBackend {
    rank: i64,
    hub: Arc<LocalCommHub>,
    received: Arc<Mutex<Vec<Envelope>>>,
}

impl LocalCommBackend {
    pub fn rank(&self) -> i64 {
        self.rank
    }

    /// Snapshot of everything this rank's mailbox has drained so far, in
    /// arrival order. Test-only observation point -- there is no production
    /// API that reads a mailbox back out, since the coherency engine is
    /// what real callers would consult.
    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().expect("received mailbox poisoned").clone()
    }
}

#[async_trait::async_trait]
impl CommBackend for LocalCommBackend {
    async fn isend_detached(&self, handle: HandleId, dest_rank: i64) {
        tracing::debug!(rank = self.rank, %handle, dest_rank, "isend_detached");
        if let Some(tx) = self.hub.senders.get(&dest_rank) {
            let _ = tx.send(Envelope {
                source_rank: self.rank,
                handle,
            });
        } else {
            tracing::warn!(dest_rank, "isend_detached: destination rank not registered with the hub");
        }
    }

    async fn irecv_detached(&self, handle: HandleId, source_rank: i64) {
        tracing::debug!(rank = self.rank, %handle, source_rank, "irecv_detached posted");
        // The mailbox drain task satisfies this in the background; posting
        // is fire-and-forget, matching the detached semantics we ground on.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn send_lands_in_destination_mailbox() {
        let hub = LocalCommHub::new();
        let rank0 = hub.backend_for_rank(0);
        let rank1 = hub.backend_for_rank(1);

        let handle_id = Uuid::new_v4();
        rank1.irecv_detached(handle_id, 0).await;
        rank0.isend_detached(handle_id, 1).await;

        // Give the background drain task a chance to run.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let received = rank1.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].source_rank, 0);
        assert_eq!(received[0].handle, handle_id);
    }

    #[tokio::test]
    async fn send_to_unregistered_rank_is_logged_and_dropped() {
        let hub = LocalCommHub::new();
        let rank0 = hub.backend_for_rank(0);
        rank0.isend_detached(Uuid::new_v4(), 7).await;
    }
}
