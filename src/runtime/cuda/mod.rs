//! CUDA runtime implementation
//!
//! Backs a context with one CUDA stream, cuBLAS for the numeric calls,
//! NVRTC-compiled kernels for the small-batch operations, and NCCL for
//! collectives, all through cudarc.
//!
//! - `CudaDevice` - one GPU, by ordinal
//! - `CudaQueue` - stream, stream-ordered allocation and event fences
//! - `CudaBlas` - cuBLAS handle plus small-batch kernels
//! - `NcclComm` - one NCCL rank
//!
//! Errors from the driver become `Error::Cuda`, cuBLAS status codes map to
//! their error kinds, and NCCL failures become `Error::Communication` with
//! the library's own message.

mod blas;
mod device;
mod kernels;
mod nccl;
mod queue;

pub use blas::CudaBlas;
pub use device::CudaDevice;
pub use nccl::NcclComm;
pub use queue::{CudaEvent, CudaQueue};

use crate::error::Result;
use crate::runtime::Runtime;

/// CUDA runtime
#[derive(Clone, Debug, Default)]
pub struct CudaRuntime;

impl Runtime for CudaRuntime {
    type Device = CudaDevice;
    type Queue = CudaQueue;
    type Blas = CudaBlas;
    type Comm = NcclComm;

    fn name() -> &'static str {
        "cuda"
    }

    fn open_queue(device: &Self::Device) -> Result<Self::Queue> {
        CudaQueue::new(device)
    }
}

/// Check whether a CUDA device can be opened on this machine.
pub fn is_cuda_available() -> bool {
    std::panic::catch_unwind(|| CudaQueue::new(&CudaDevice::new(0)).is_ok()).unwrap_or(false)
}
