//! Owner-computes distributed dispatch layered on top of `dagrt-core`'s
//! submission contract: each rank runs its own [`dagrt_core::Runtime`], and
//! [`shim::OwnerComputesShim`] decides, per task, whether this rank executes
//! it locally and which cross-rank transfers its handle bindings need.

pub mod comm;
pub mod error;
pub mod shim;

pub use comm::{CommBackend, LocalCommBackend, LocalCommHub};
pub use error::{Error, Result};
pub use shim::{DoExecute, OwnerComputesShim};
