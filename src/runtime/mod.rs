//! Runtime backends and the per-context machinery shared by all of them
//!
//! # Architecture
//!
//! ```text
//! Runtime (backend identity)
//! ├── Device  (identifies one accelerator)
//! ├── Queue   (the single ordered execution queue of a context)
//! ├── Blas    (numeric-library handle + small-batch kernels)
//! └── Comm    (one participant of a collective world)
//!
//! Context ── Gate (critical section) ── DeviceBuffer (hazard fences)
//! ```

mod buffer;
mod context;
mod gate;
mod hazard;
mod scratch;
pub mod traits;

pub mod emulated;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use buffer::{BufferRef, DeviceBuffer};
pub use context::{Context, HandleId};
pub use gate::Gate;
pub use hazard::{HazardMode, HazardState};
pub use traits::{
    BlasBackend, BlasCapabilities, CLIQUE_ID_BYTES, CollectiveBackend, Device, ExecutionQueue,
    Runtime,
};

pub(crate) use hazard::fenced;
pub(crate) use scratch::ScratchPointers;
