//! `push_local_task`'s prefetch step only fires when the runtime was built
//! (or `DAGRT_PREFETCH`) with prefetch enabled.

use std::sync::Arc;

use dagrt_core::codelet::Codelet;
use dagrt_core::handle::{AccessMode, DataHandle};
use dagrt_core::task::TaskBuilder;
use dagrt_core::worker::DeviceKind;
use dagrt_core::{Runtime, RuntimeConfig};

fn noop_codelet() -> Arc<Codelet> {
    Arc::new(
        Codelet::builder("noop")
            .implementation(DeviceKind::Cpu, Arc::new(|| Box::pin(async { Ok(()) })))
            .build(),
    )
}

#[tokio::test]
async fn prefetch_enabled_makes_read_bindings_resident_on_push() {
    let runtime = Runtime::new(RuntimeConfig::new().prefetch(true).worker(DeviceKind::Cpu, 0));

    let handle = DataHandle::new(-1);
    assert!(!runtime.coherency().is_resident(&handle, 0));

    let task = TaskBuilder::new("reader")
        .codelet(noop_codelet())
        .handle(handle.clone(), AccessMode::Read)
        .build();
    runtime.push_local_task(task, 0).unwrap();

    assert!(runtime.coherency().is_resident(&handle, 0));
}

#[tokio::test]
async fn prefetch_disabled_leaves_bindings_non_resident_on_push() {
    let runtime = Runtime::new(RuntimeConfig::new().prefetch(false).worker(DeviceKind::Cpu, 0));

    let handle = DataHandle::new(-1);
    let task = TaskBuilder::new("reader")
        .codelet(noop_codelet())
        .handle(handle.clone(), AccessMode::Read)
        .build();
    runtime.push_local_task(task, 0).unwrap();

    assert!(!runtime.coherency().is_resident(&handle, 0));
}
