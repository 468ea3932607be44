//! Codelet descriptors: per-device kernel entry points and eligibility.
//!
//! The per-driver kernel invocation itself is an external collaborator (out
//! of scope per the purpose & scope section); what this module owns is the
//! *descriptor* -- the bundle of alternative implementations and the
//! eligibility check the dispatcher and priority deque rely on.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::handle::AccessMode;
use crate::worker::DeviceKind;

/// Maximum number of alternative implementations a codelet may register per
/// device kind, matching `STARPU_MAXIMPLEMENTATIONS` in the source system.
pub const MAX_IMPLEMENTATIONS: usize = 4;

/// A single kernel entry point. Boxed so callers can supply arbitrary async
/// work without the codelet leaking a concrete closure type, the same
/// reasoning the teacher applies to its scheduler's `TaskFn`.
pub type KernelFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Bundle of alternative kernel implementations with device-eligibility
/// metadata.
pub struct Codelet {
    pub name: String,
    kernels: HashMap<DeviceKind, Vec<KernelFn>>,
    pub modes: Vec<AccessMode>,
    pub nbuffers: usize,
}

impl Codelet {
    pub fn builder(name: impl Into<String>) -> CodeletBuilder {
        CodeletBuilder {
            name: name.into(),
            kernels: HashMap::new(),
            modes: Vec::new(),
        }
    }

    /// Whether at least one implementation exists for `device_kind`, i.e.
    /// `worker_can_execute(codelet, worker, impl_index)` holds for some
    /// `impl_index`.
    pub fn can_execute_on(&self, device_kind: DeviceKind) -> bool {
        self.kernels
            .get(&device_kind)
            .is_some_and(|impls| !impls.is_empty())
    }

    /// The first executable implementation for `device_kind`, if any.
    pub fn kernel_for(&self, device_kind: DeviceKind, impl_index: usize) -> Option<&KernelFn> {
        self.kernels.get(&device_kind)?.get(impl_index)
    }
}

pub struct CodeletBuilder {
    name: String,
    kernels: HashMap<DeviceKind, Vec<KernelFn>>,
    modes: Vec<AccessMode>,
}

impl CodeletBuilder {
    pub fn implementation(mut self, device_kind: DeviceKind, kernel: KernelFn) -> Self {
        let impls = self.kernels.entry(device_kind).or_default();
        assert!(
            impls.len() < MAX_IMPLEMENTATIONS,
            "codelet {} already has {MAX_IMPLEMENTATIONS} implementations for {device_kind:?}",
            self.name
        );
        impls.push(kernel);
        self
    }

    pub fn mode(mut self, mode: AccessMode) -> Self {
        self.modes.push(mode);
        self
    }

    pub fn build(self) -> Codelet {
        let nbuffers = self.modes.len();
        Codelet {
            name: self.name,
            kernels: self.kernels,
            modes: self.modes,
            nbuffers,
        }
    }
}
