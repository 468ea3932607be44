//! Memory-node coherency: the external collaborator named in the purpose &
//! scope section ("we consume `fetch`, `prefetch`, `acquire`, `release` on a
//! handle"). This module owns only the trait boundary and an in-process
//! reference implementation good enough to drive the dispatcher's prefetch
//! behavior in tests; a real multi-device coherency engine is a
//! caller-supplied implementation.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;
use crate::handle::{DataHandle, HandleId};
use crate::worker::MemoryNodeId;

/// The coherency operations the dispatcher and worker loop rely on.
pub trait MemoryCoherencyOps: Send + Sync {
    /// Block until `handle`'s data is resident on `memory_node`.
    fn fetch(&self, handle: &DataHandle, memory_node: MemoryNodeId) -> Result<()>;

    /// Request asynchronous prefetch of `handle` onto `memory_node`; best
    /// effort, never blocks the caller.
    fn prefetch(&self, handle: &DataHandle, memory_node: MemoryNodeId);

    /// Acquire exclusive or shared access (per the handle's own FIFO, which
    /// this trait does not duplicate) to the resident copy on `memory_node`.
    fn acquire(&self, handle: &DataHandle, memory_node: MemoryNodeId) -> Result<()>;

    /// Release a prior `acquire`.
    fn release(&self, handle: &DataHandle, memory_node: MemoryNodeId);
}

/// Reference implementation: tracks which memory nodes a handle is resident
/// on, for logging and test assertions. There is no actual data movement --
/// every node is assumed to already share the same address space, which is
/// true of every scenario this workspace's tests drive.
pub struct InProcessCoherency {
    resident: DashMap<HandleId, HashSet<MemoryNodeId>>,
}

impl InProcessCoherency {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            resident: DashMap::new(),
        })
    }

    pub fn is_resident(&self, handle: &DataHandle, memory_node: MemoryNodeId) -> bool {
        self.resident
            .get(&handle.id())
            .is_some_and(|nodes| nodes.contains(&memory_node))
    }
}

impl MemoryCoherencyOps for InProcessCoherency {
    fn fetch(&self, handle: &DataHandle, memory_node: MemoryNodeId) -> Result<()> {
        self.resident.entry(handle.id()).or_default().insert(memory_node);
        tracing::trace!(handle_id = %handle.id(), memory_node, "fetched");
        Ok(())
    }

    fn prefetch(&self, handle: &DataHandle, memory_node: MemoryNodeId) {
        self.resident.entry(handle.id()).or_default().insert(memory_node);
        tracing::trace!(handle_id = %handle.id(), memory_node, "prefetched");
    }

    fn acquire(&self, handle: &DataHandle, memory_node: MemoryNodeId) -> Result<()> {
        self.fetch(handle, memory_node)
    }

    fn release(&self, handle: &DataHandle, memory_node: MemoryNodeId) {
        tracing::trace!(handle_id = %handle.id(), memory_node, "released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefetch_marks_resident() {
        let coherency = InProcessCoherency::new();
        let h = DataHandle::new(-1);
        assert!(!coherency.is_resident(&h, 0));
        coherency.prefetch(&h, 0);
        assert!(coherency.is_resident(&h, 0));
    }
}
