//! Runtime traits for backend abstraction

pub mod blas;
pub mod comm;
pub mod device;
pub mod queue;
pub mod runtime;

pub use blas::{
    BlasBackend, BlasCapabilities, DotCall, GemmCall, GemvCall, GerCall, LaunchGeometry,
    PointerArrays, SmallGemvCall, SmallGerCall, Strides,
};
pub use comm::{CLIQUE_ID_BYTES, CollectiveBackend};
pub use device::Device;
pub use queue::ExecutionQueue;
pub use runtime::Runtime;
